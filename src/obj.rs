/* ulmld object file parser
 *
 * Reads one textual object (segments, symtab, fixups) into the link
 * state. Every address is biased by the source unit's mark on the target
 * segment while it is read, so downstream code only ever sees segment
 * offsets.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use crate::error::{LinkError, Result};
use crate::generate::{Executable, FixEntry, FixKind, BSS, DATA, TEXT};

/* track which part of the object file we're inside */
enum Section
{
    Preamble,
    Text,
    Data,
    Bss,
    Symtab,
    Fixups,
}

/* parse the given object file contents into the link state. source names
   the translation unit, eg a.o or libx.a(m1.o) */
pub fn read_segments(exe: &mut Executable, contents: &str, source: &str) -> Result<()>
{
    if !contents.starts_with('#')
    {
        return Err(LinkError::msg(format!("not an object file {}", source)));
    }

    let mut section = Section::Preamble;

    /* the first byte line of a unit's segment establishes a local base
       address shared across the unit until another first line resets it */
    let mut local_base: u64 = 0;

    for line in contents.lines()
    {
        if let Some(rest) = line.strip_prefix("#TEXT")
        {
            section = Section::Text;
            enter_byte_segment(exe, TEXT, rest, source)?;
            continue;
        }
        if let Some(rest) = line.strip_prefix("#DATA")
        {
            section = Section::Data;
            enter_byte_segment(exe, DATA, rest, source)?;
            continue;
        }
        if let Some(rest) = line.strip_prefix("#BSS")
        {
            section = Section::Bss;
            read_bss(exe, rest, source)?;
            continue;
        }
        if line.starts_with("#SYMTAB")
        {
            section = Section::Symtab;
            continue;
        }
        if line.starts_with("#FIXUPS")
        {
            section = Section::Fixups;
            continue;
        }
        if line.starts_with('#') || line.trim().is_empty()
        {
            /* stray directives (the shebang included) and blank lines */
            continue;
        }

        match section
        {
            Section::Text => read_byte_line(exe, TEXT, line, source, &mut local_base)?,
            Section::Data => read_byte_line(exe, DATA, line, source, &mut local_base)?,
            Section::Symtab => read_symtab_line(exe, line, source)?,
            Section::Fixups => read_fixup_line(exe, line, source)?,
            Section::Bss | Section::Preamble => (), /* nothing to read here */
        }
    }
    Ok(())
}

/* #TEXT and #DATA may carry an alignment. the alignment is raised before
   the unit's mark is recorded so the mark lands on the aligned boundary */
fn enter_byte_segment(exe: &mut Executable, seg: usize, rest: &str, source: &str) -> Result<()>
{
    let args = strip_spaces(rest);
    if !args.is_empty()
    {
        let alignment = parse_dec(&args).ok_or_else(|| LinkError::msg(format!(
            "bad alignment '{}' in {}", args, source)))?;
        exe.segments[seg].set_alignment(alignment, source)?;
    }
    exe.segments[seg].set_mark(source);
    Ok(())
}

/* #BSS <alignment> <size> reserves size bytes without carrying any */
fn read_bss(exe: &mut Executable, rest: &str, source: &str) -> Result<()>
{
    let mut fields = rest.split_whitespace();
    let alignment = fields.next().and_then(parse_dec).ok_or_else(|| LinkError::msg(format!(
        "bad #BSS directive in {}", source)))?;
    let size = fields.next().and_then(parse_dec).ok_or_else(|| LinkError::msg(format!(
        "bad #BSS directive in {}", source)))?;

    let segment = &mut exe.segments[BSS];
    segment.set_alignment(alignment, source)?;
    segment.set_mark(source);
    if size > 0
    {
        let end = segment.get_mark(source) + size;
        segment.advance_to(end)?;
    }
    Ok(())
}

/* a byte line is hex pairs, optionally prefixed by a unit-local address
   and suffixed by a comment that becomes an annotation */
fn read_byte_line(exe: &mut Executable, seg: usize, line: &str, source: &str, local_base: &mut u64)
    -> Result<()>
{
    let (code, comment) = split_comment(line);
    let code = strip_spaces(code);

    let segment = &mut exe.segments[seg];
    if segment.is_at_mark(source)
    {
        segment.append_header(&format!("# from: {}", source));
    }

    let (unit_addr, bytes) = match code.find(':')
    {
        Some(at) =>
        {
            let given = parse_hex(&code[..at]).ok_or_else(|| LinkError::msg(format!(
                "bad address '{}' in {}", &code[..at], source)))?;
            if segment.is_at_mark(source)
            {
                *local_base = given;
            }
            (given.wrapping_sub(*local_base), String::from(&code[at + 1..]))
        }
        None =>
        {
            let next = segment.size() - segment.get_mark(source);
            if segment.is_at_mark(source)
            {
                *local_base = next;
            }
            (next, code)
        }
    };

    let addr = unit_addr.wrapping_add(segment.get_mark(source));
    if segment.requires_advance_to(addr)
    {
        return Err(LinkError::msg(format!(
            "gap in segment {} of {} that would require fill bytes; only alignment padding is allowed",
            segment.name(), source)));
    }

    segment.insert_byte_string(addr, &bytes)?;
    if !comment.is_empty()
    {
        segment.append_annotation(comment);
    }
    Ok(())
}

/* a symtab line is <kind> <ident> <hex value>. upper-case kinds define
   globals, lower-case kinds are unit locals, U is a reference */
fn read_symtab_line(exe: &mut Executable, line: &str, source: &str) -> Result<()>
{
    let mut fields = line.split_whitespace();
    let (kind, ident, value) = match (fields.next(), fields.next(), fields.next())
    {
        (Some(kind), Some(ident), Some(value)) if kind.len() == 1 => (kind, ident, value),
        _ => return Err(LinkError::msg(format!("bad symbol table entry '{}' in {}", line, source))),
    };
    let kind = kind.chars().next().unwrap_or('?');
    let mut value = parse_hex(value).ok_or_else(|| LinkError::msg(format!(
        "bad symbol value '{}' in {}", value, source)))?;

    /* segment-resident symbols are biased by the unit's mark and label
       their bytes in the listing, assembler-private idents included */
    match kind
    {
        'T' | 't' =>
        {
            if kind == 'T'
            {
                exe.resolve(ident);
            }
            value = value.wrapping_add(exe.segments[TEXT].get_mark(source));
            exe.segments[TEXT].insert_label(&format!("#{}:", ident), value);
        }
        'D' | 'd' =>
        {
            if kind == 'D'
            {
                exe.resolve(ident);
            }
            value = value.wrapping_add(exe.segments[DATA].get_mark(source));
            exe.segments[DATA].insert_label(&format!("#{}:", ident), value);
        }
        'B' | 'b' =>
        {
            if kind == 'B'
            {
                exe.resolve(ident);
            }
            value = value.wrapping_add(exe.segments[BSS].get_mark(source));
            exe.segments[BSS].insert_label(&format!("#{}:", ident), value);
        }
        'A' =>
        {
            /* absolute values are stored verbatim */
            exe.resolve(ident);
        }
        _ => (),
    }

    if kind == 'U'
    {
        exe.reference(ident);
        return Ok(());
    }
    if ident.starts_with('.')
    {
        /* assembler-private symbols stay out of the tables */
        return Ok(());
    }
    if kind.is_ascii_lowercase()
    {
        exe.define_local(ident, kind, value);
        return Ok(());
    }
    exe.define(ident, kind, value, source)
}

/* a fixup line is <segment> <hex addr> <offset> <width> <kind> <ident>,
   where offset and width count bits and ident may carry a +N or -N
   displacement suffix */
fn read_fixup_line(exe: &mut Executable, line: &str, source: &str) -> Result<()>
{
    let mut fields = line.split_whitespace();
    let (segment, addr, offset, num_bytes, kind, target) =
        match (fields.next(), fields.next(), fields.next(), fields.next(), fields.next(), fields.next())
    {
        (Some(segment), Some(addr), Some(offset), Some(num_bytes), Some(kind), Some(target)) =>
            (segment, addr, offset, num_bytes, kind, target),
        _ => return Err(LinkError::msg(format!("bad fixup entry '{}' in {}", line, source))),
    };

    let seg = match segment
    {
        "text" => TEXT,
        "data" => DATA,
        other => return Err(LinkError::msg(format!(
            "can not apply a fix in segment '{}' in {}", other, source))),
    };

    let addr = parse_hex(addr).ok_or_else(|| LinkError::msg(format!(
        "bad fixup address '{}' in {}", addr, source)))?;
    let offset = parse_dec(offset).ok_or_else(|| LinkError::msg(format!(
        "bad fixup offset '{}' in {}", offset, source)))?;
    let num_bytes = parse_dec(num_bytes).ok_or_else(|| LinkError::msg(format!(
        "bad fixup width '{}' in {}", num_bytes, source)))?;

    /* the file format counts offset and width in bits; we work in bytes */
    if offset % 8 != 0 || num_bytes % 8 != 0
    {
        return Err(LinkError::msg(format!(
            "fixup offset and width must be multiples of 8 bits in {}", source)));
    }
    let offset = offset / 8;
    let num_bytes = num_bytes / 8;

    let kind = match kind
    {
        "absolute" => FixKind::Absolute,
        "relative" => FixKind::Relative,
        "w0" => FixKind::Word(0),
        "w1" => FixKind::Word(1),
        "w2" => FixKind::Word(2),
        "w3" => FixKind::Word(3),
        other => return Err(LinkError::msg(format!(
            "can not apply a '{}' fix in {}", other, source))),
    };

    let (ident, mut displace) = split_displacement(target)?;

    /* [text], [data] and [bss] are segment-relative self references:
       fold the unit's mark for that segment into the displacement */
    match ident
    {
        "[text]" => displace = displace.wrapping_add(exe.segments[TEXT].get_mark(source) as i64),
        "[data]" => displace = displace.wrapping_add(exe.segments[DATA].get_mark(source) as i64),
        "[bss]" => displace = displace.wrapping_add(exe.segments[BSS].get_mark(source) as i64),
        _ => (),
    }

    let addr = addr.wrapping_add(exe.segments[seg].get_mark(source));
    exe.add_fixup(ident, FixEntry { segment: seg, addr, offset, num_bytes, kind, displace });
    Ok(())
}

/* the sign is both the separator and the sign of the displacement.
   idents never start with + or -, so split at the rightmost sign past
   the first character */
fn split_displacement(target: &str) -> Result<(&str, i64)>
{
    let split = target.char_indices()
        .skip(1)
        .filter(|(_, ch)| *ch == '+' || *ch == '-')
        .map(|(at, _)| at)
        .last();

    match split
    {
        Some(at) =>
        {
            let displace = target[at..].parse::<i64>().map_err(|_| LinkError::msg(format!(
                "bad displacement '{}' on {}", &target[at..], target)))?;
            Ok((&target[..at], displace))
        }
        None => Ok((target, 0)),
    }
}

fn split_comment(line: &str) -> (&str, &str)
{
    match line.find('#')
    {
        Some(at) =>
        {
            let mut comment = &line[at + 1..];
            if let Some(stripped) = comment.strip_prefix(' ')
            {
                comment = stripped;
            }
            (&line[..at], comment)
        }
        None => (line, ""),
    }
}

fn strip_spaces(text: &str) -> String
{
    text.chars().filter(|ch| !ch.is_whitespace()).collect()
}

fn parse_hex(text: &str) -> Option<u64>
{
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

fn parse_dec(text: &str) -> Option<u64>
{
    text.parse().ok()
}
