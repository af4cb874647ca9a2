/* ulmranlib
 *
 * Generate the __SYMTAB_INDEX line format for an archive of ULM objects:
 * one line per global definition naming the member that provides it.
 * Store the output in a member called __SYMTAB_INDEX and ulmld will pull
 * members out of the archive lazily instead of linking all of them.
 *
 * Syntax: ulmranlib archive
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::path::Path;

use ulmld::archive::Archive;
use ulmld::generate::SYMTAB_INDEX;

fn main()
{
    let args = std::env::args().collect::<Vec<String>>();
    if args.len() != 2
    {
        ulmld::fatal_msg!("usage: archive");
    }

    let archive = match Archive::open(Path::new(&args[1]))
    {
        Ok(Some(archive)) => archive,
        Ok(None) => ulmld::fatal_msg!("could not open as archive: {}", args[1]),
        Err(reason) => ulmld::fatal_msg!("{}", reason),
    };

    /* any index already present is about to be replaced, so skip it */
    let names = archive.members()
        .map(|member| member.name.clone())
        .filter(|name| name != SYMTAB_INDEX)
        .collect::<Vec<String>>();

    for name in names
    {
        if let Some(data) = archive.member_data(&name)
        {
            print_index_lines(&String::from_utf8_lossy(data), &name);
        }
    }
}

/* scan one member for its #SYMTAB section and print an index line for
   every global definition found there */
fn print_index_lines(contents: &str, member: &str)
{
    let mut in_symtab = false;

    for line in contents.lines()
    {
        if line.starts_with("#SYMTAB")
        {
            in_symtab = true;
            continue;
        }
        if !in_symtab
        {
            continue;
        }
        if line.starts_with("#FIXUPS")
        {
            break;
        }
        if line.starts_with('#') || line.trim().is_empty()
        {
            continue;
        }

        let mut fields = line.split_whitespace();
        if let (Some(kind), Some(ident)) = (fields.next(), fields.next())
        {
            let kind = kind.chars().next().unwrap_or(' ');
            if kind.is_ascii_uppercase() && kind != 'U'
            {
                println!("{} {:<27} {}", kind, ident, member);
            }
        }
    }
}
