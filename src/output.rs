/* Output the linked executable
 *
 * Serializes the final object in the same textual format the linker
 * consumes: a shebang naming the ULM runtime, the segment directives and
 * bytes, then the global and local symbol tables sorted by ident. The
 * stripped form drops the address gutters and decorations and is the
 * canonical round-trip form.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::{LinkError, Result};
use crate::generate::{Executable, BSS, DATA, TEXT};

/* write the executable to storage. a half-written file never survives */
pub fn write(exe: &Executable, path: &Path, runtime: &str, strip: bool) -> Result<()>
{
    let file = File::create(path).map_err(|reason| LinkError::msg(format!(
        "can not create {}: {}", path.display(), reason)))?;

    let mut out = BufWriter::new(file);
    let written = render(exe, &mut out, runtime, strip).and_then(|_| out.flush());
    if let Err(reason) = written
    {
        let _ = std::fs::remove_file(path);
        return Err(LinkError::msg(format!("can not write {}: {}", path.display(), reason)));
    }
    Ok(())
}

/* serialize the executable to the given stream */
pub fn render(exe: &Executable, out: &mut dyn Write, runtime: &str, strip: bool) -> io::Result<()>
{
    writeln!(out, "#!/usr/bin/env -S {}", runtime)?;

    writeln!(out, "#TEXT {}", exe.segments[TEXT].alignment())?;
    exe.segments[TEXT].write_rows(out, strip)?;
    writeln!(out, "#DATA {}", exe.segments[DATA].alignment())?;
    exe.segments[DATA].write_rows(out, strip)?;

    /* bss carries no bytes, just its reservation */
    writeln!(out, "#BSS {} {}", exe.segments[BSS].alignment(), exe.segments[BSS].size())?;
    writeln!(out, "#(begins at 0x{:x})", exe.segments[BSS].base_addr())?;

    writeln!(out, "#SYMTAB")?;
    for (ident, entry) in exe.globals()
    {
        writeln!(out, "{} {:<27} 0x{:016X}", entry.kind, ident, entry.value)?;
    }
    for (ident, entries) in exe.locals()
    {
        for entry in entries
        {
            writeln!(out, "{} {:<27} 0x{:016X}", entry.kind, ident, entry.value)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::obj::read_segments;

    fn rendered(exe: &Executable, strip: bool) -> String
    {
        let mut out = Vec::new();
        render(exe, &mut out, "ulm", strip).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn output_shape()
    {
        let mut exe = Executable::new(0xFD);
        read_segments(&mut exe, "#TEXT\n00112233\n#SYMTAB\nT main 0x0\nt helper 0x2\n", "a.o").unwrap();
        exe.link(0x1000).unwrap();

        let text = rendered(&exe, false);
        assert!(text.starts_with("#!/usr/bin/env -S ulm\n"));
        assert!(text.contains("#TEXT 1\n"));
        assert!(text.contains("# from: a.o"));
        assert!(text.contains("#main:"));
        assert!(text.contains("#BSS 1 0\n"));
        assert!(text.contains(&format!("T {:<27} 0x{:016X}\n", "main", 0x1000)));

        /* locals keep their parse-time values */
        assert!(text.contains(&format!("t {:<27} 0x{:016X}\n", "helper", 2)));
    }

    #[test]
    fn stripped_output_round_trips()
    {
        let mut exe = Executable::new(0xFD);
        let a = "#TEXT 4\n0011223344\n#DATA 8\nAABB # a note\n#BSS 8 64\n#SYMTAB\nT main 0x0\nD table 0x0\nA top 0xFFFF000000000000\n";
        let b = "#TEXT 4\n5566778899AABBCC\n#SYMTAB\nT f 0x0\nU table\n#FIXUPS\ntext 0 0 64 absolute table\n";
        read_segments(&mut exe, a, "a.o").unwrap();
        read_segments(&mut exe, b, "b.o").unwrap();
        exe.link(0x1000).unwrap();

        let emitted = rendered(&exe, true);
        let mut reparsed = Executable::new(0xFD);
        read_segments(&mut reparsed, &emitted, "a.out").unwrap();

        for seg in [TEXT, DATA, BSS]
        {
            assert_eq!(exe.segments[seg].bytes(), reparsed.segments[seg].bytes(),
                       "segment {} bytes differ", seg);
            assert_eq!(exe.segments[seg].size(), reparsed.segments[seg].size());
        }

        let original: Vec<(String, char, u64)> =
            exe.globals().map(|(i, e)| (i.clone(), e.kind, e.value)).collect();
        let round_tripped: Vec<(String, char, u64)> =
            reparsed.globals().map(|(i, e)| (i.clone(), e.kind, e.value)).collect();
        assert_eq!(original, round_tripped);
    }
}
