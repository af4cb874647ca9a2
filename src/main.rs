/* ulmld
 *
 * Static linker for the ULM educational CPU family. Consumes textual
 * object files and ar(5) archive libraries, composes their text, data
 * and bss segments at chosen load addresses, resolves symbols across
 * translation units, applies fixups and writes an executable in the
 * same textual object format.
 *
 * Syntax: ulmld [options] file...
 *
 * It accepts the following binutils ld-compatible command-line arguments:
 *
 * -L <path>        Add <path> to the directories searched for -lNAME libraries
 * -o <output>      Write the executable to <output>, or a.out if not specified
 * -T <config>      Read linker settings from configuration file <config>
 * -textseg <addr>  Load the text segment at hex address <addr>
 * -s               Emit the stripped form, without address gutters or notes
 * --start-group    Mark the start of a group of archives resolved to a fixed point
 * --end-group      Mark the end of a group created by --start-group
 *
 * --help           Display minimal usage information
 * --version        Display version information
 *
 * Interspersed in the command line arguments are the object files,
 * archives and -lNAME library references to link, in link order. The
 * ULM_LIBRARY_PATH environment variable may carry a colon-separated
 * list of extra library directories.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::path::Path;

use ulmld::cmd;
use ulmld::config::{self, Config};
use ulmld::context::{Context, StreamItem};
use ulmld::error::Result;
use ulmld::generate::Executable;
use ulmld::output;
use ulmld::search::Paths;

fn main()
{
    /* find out what needs to be done from command line arguments */
    let context = cmd::parse_args();

    /* the settings file is optional: fall back to built-in defaults */
    let config = match context.get_config_file()
    {
        Some(filename) => config::parse_config(&filename),
        None => config::default_config(),
    };

    /* there is exactly one catch site, and this is it */
    if let Err(reason) = link(&context, &config)
    {
        ulmld::fatal_msg!("execution aborted\n{}", reason);
    }
}

/* run the whole linking process: gather the inputs in command-line order,
   place the segments, apply the fixups, and write the executable */
fn link(context: &Context, config: &Config) -> Result<()>
{
    /* get a database ready of paths to search libraries for in */
    let mut paths = Paths::new();
    for dir in context.search_paths()
    {
        paths.add(dir);
    }
    paths.add_from_environment();

    let mut exe = Executable::new(config.get_output().get_fill());

    /* run through the stream of inputs to complete the linking process */
    for item in context.stream_iter()
    {
        match item
        {
            StreamItem::File(filename) => { exe.add_lib_or_object(filename, &paths, false)?; }
            StreamItem::Group(group) => exe.add_group(group, &paths)?,
        }
    }

    let text_base = match context.get_text_base()
    {
        Some(addr) => addr,
        None => config.get_output().get_text_base(),
    };
    exe.link(text_base)?;

    let strip = context.get_strip() || config.get_output().get_strip();
    output::write(&exe, Path::new(&context.get_output_file()),
                  &config.get_output().get_runtime(), strip)
}
