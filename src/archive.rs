/* Common portable ar(5) archive reader
 *
 * Memory-maps an archive and scans its 60-byte member headers into a
 * directory that preserves archive order. Long names backed by a leading
 * // string table, BSD blank-terminated names, and the /-named ranlib
 * symbol table are all understood. Member bodies are handed out as byte
 * slices into the map; callers copy whatever they keep.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::fs::File;
use std::path::Path;

use indexmap::IndexMap;
use memmap2::Mmap;

use crate::error::{LinkError, Result};

pub const MAGIC: &[u8] = b"!<arch>\n";

const HEADER_LEN: usize = 60;
const NAME_LEN: usize = 16;

pub struct Member
{
    pub name: String,
    pub mtime: u64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub size: usize,

    /* where the body starts within the map */
    offset: usize,
}

pub struct Archive
{
    map: Mmap,
    members: IndexMap<String, Member>,

    /* body range of the /-named symbol table member, if any */
    symtab: Option<(usize, usize)>,
}

impl Archive
{
    /* open the archive at the given path. Ok(None) means the file can't be
       read or isn't an archive at all, so the caller may treat the path as
       something else; a file that carries the archive magic but is
       malformed inside is an error, and no partial directory escapes */
    pub fn open(path: &Path) -> Result<Option<Archive>>
    {
        let file = match File::open(path)
        {
            Ok(file) => file,
            Err(_) => return Ok(None),
        };
        let metadata = match file.metadata()
        {
            Ok(metadata) => metadata,
            Err(_) => return Ok(None),
        };
        if !metadata.is_file() || metadata.len() < MAGIC.len() as u64
        {
            return Ok(None);
        }

        /* if the archive changes in storage while mapped then we'll
           probably crash */
        let map = match unsafe { Mmap::map(&file) }
        {
            Ok(map) => map,
            Err(_) => return Ok(None),
        };
        if &map[..MAGIC.len()] != MAGIC
        {
            return Ok(None);
        }

        let (members, symtab) = scan(&map).map_err(|reason|
            LinkError::because(format!("can not read archive {}", path.display()), reason))?;

        Ok(Some(Archive { map, members, symtab }))
    }

    /* iterate the member directory in archive order */
    pub fn members(&self) -> impl Iterator<Item = &Member>
    {
        self.members.values()
    }

    pub fn has_member(&self, name: &str) -> bool
    {
        self.members.contains_key(name)
    }

    /* random access to a member's body by name */
    pub fn member_data(&self, name: &str) -> Option<&[u8]>
    {
        self.members.get(name).map(|member| &self.map[member.offset..member.offset + member.size])
    }

    /* the ranlib symbol table member, the one with an empty or / name */
    pub fn symtab_data(&self) -> Option<&[u8]>
    {
        self.symtab.map(|(offset, len)| &self.map[offset..offset + len])
    }
}

/* walk the member headers, building the directory. the optional string
   table backs /N long names and must precede every named member; only
   the symbol table may come before it */
fn scan(map: &[u8]) -> Result<(IndexMap<String, Member>, Option<(usize, usize)>)>
{
    let mut members = IndexMap::new();
    let mut symtab = None;
    let mut string_table: Option<&[u8]> = None;
    let mut pos = MAGIC.len();

    while pos + HEADER_LEN <= map.len()
    {
        let header = &map[pos..pos + HEADER_LEN];
        if &header[58..60] != b"`\n"
        {
            return Err(LinkError::msg(format!("bad member trailer at offset {}", pos)));
        }

        let name_field = &header[0..NAME_LEN];
        let body = pos + HEADER_LEN;

        if name_field.starts_with(b"//")
        {
            if !members.is_empty() || string_table.is_some()
            {
                return Err(LinkError::msg("string table must precede the named members"));
            }
            let size = field_value(&header[48..58], 10)
                .ok_or_else(|| LinkError::msg(format!("bad size field at offset {}", pos)))? as usize;
            if body + size > map.len()
            {
                return Err(LinkError::msg("archive is truncated"));
            }
            string_table = Some(&map[body..body + size]);
            pos = body + size + (size & 1);
            continue;
        }

        let name = member_name(name_field, string_table)?;
        let mtime = field_value(&header[16..28], 10)
            .ok_or_else(|| LinkError::msg(format!("bad date field at offset {}", pos)))?;
        let uid = field_value(&header[28..34], 10)
            .ok_or_else(|| LinkError::msg(format!("bad uid field at offset {}", pos)))?;
        let gid = field_value(&header[34..40], 10)
            .ok_or_else(|| LinkError::msg(format!("bad gid field at offset {}", pos)))?;
        let mode = field_value(&header[40..48], 8)
            .ok_or_else(|| LinkError::msg(format!("bad mode field at offset {}", pos)))?;
        let size = field_value(&header[48..58], 10)
            .ok_or_else(|| LinkError::msg(format!("bad size field at offset {}", pos)))? as usize;

        if body + size > map.len()
        {
            return Err(LinkError::msg("archive is truncated"));
        }

        if name.is_empty()
        {
            /* the ranlib symbol table */
            if symtab.is_some()
            {
                return Err(LinkError::msg("more than one symbol table member"));
            }
            symtab = Some((body, size));
        }
        else
        {
            let member = Member
            {
                name: name.clone(),
                mtime,
                uid: uid as u32,
                gid: gid as u32,
                mode: mode as u32,
                size,
                offset: body,
            };
            if members.insert(name.clone(), member).is_some()
            {
                return Err(LinkError::msg(format!("duplicate member name {}", name)));
            }
        }

        /* bodies are 2-byte aligned */
        pos = body + size + (size & 1);
    }

    if pos != map.len()
    {
        return Err(LinkError::msg("archive is truncated"));
    }
    Ok((members, symtab))
}

/* decode the 16-byte ar_name field. plain names end at a /, BSD names at
   a run of trailing blanks, the symbol table's name is empty, and /N
   names point into the string table where the name runs up to a /
   followed by a newline */
fn member_name(field: &[u8], string_table: Option<&[u8]>) -> Result<String>
{
    if field[0] == b'/' && field[1] != b' '
    {
        let table = match string_table
        {
            Some(table) => table,
            None => return Err(LinkError::msg("long member name but no string table")),
        };
        let offset = field_offset(field)
            .ok_or_else(|| LinkError::msg("bad string table offset"))? as usize;
        if offset >= table.len()
        {
            return Err(LinkError::msg("string table offset out of range"));
        }

        for i in offset..table.len().saturating_sub(1)
        {
            if table[i] == b'/'
            {
                if i == offset || table[i + 1] != b'\n'
                {
                    return Err(LinkError::msg("malformed string table entry"));
                }
                return name_from_bytes(&table[offset..i]);
            }
        }
        return Err(LinkError::msg("unterminated string table entry"));
    }

    let mut slash = None;
    let mut blank = 0;
    for (i, &ch) in field.iter().enumerate()
    {
        if ch == b'/'
        {
            slash = Some(i);
            break;
        }
        if ch != b' '
        {
            blank = 0;
        }
        else if blank == 0
        {
            blank = i;
        }
    }

    let len = match slash
    {
        Some(at) => at,
        None if blank > 0 => blank, /* no trailing /, possibly the BSD variant */
        None => return Err(LinkError::msg("member name is not terminated")),
    };
    name_from_bytes(&field[..len])
}

fn name_from_bytes(bytes: &[u8]) -> Result<String>
{
    String::from_utf8(bytes.to_vec()).map_err(|_| LinkError::msg("member name is not valid text"))
}

/* parse a space-padded numeric header field in the given base. blanks may
   lead or trail but each run must be contiguous, and anything wider than
   32 bits is rejected */
fn field_value(field: &[u8], base: u32) -> Option<u64>
{
    let mut value: u64 = 0;
    let mut skip = true;
    let mut padding = false;

    for &ch in field
    {
        if skip
        {
            if ch == b' '
            {
                continue;
            }
            skip = false;
        }
        if padding
        {
            if ch != b' '
            {
                return None;
            }
            continue;
        }
        if ch == b' '
        {
            padding = true;
            continue;
        }

        let digit = (ch as char).to_digit(base)? as u64;
        value = value * base as u64 + digit;
        if value > u32::MAX as u64
        {
            return None;
        }
    }

    if skip
    {
        return None;
    }
    Some(value)
}

/* decode the decimal offset in a /N name field */
fn field_offset(field: &[u8]) -> Option<u64>
{
    let mut value: u64 = 0;

    for (i, &ch) in field.iter().enumerate().skip(1)
    {
        if ch == b' '
        {
            if i == 1
            {
                return None;
            }
            break;
        }
        let digit = (ch as char).to_digit(10)? as u64;
        value = value * 10 + digit;
    }

    if value > u32::MAX as u64
    {
        return None;
    }
    Some(value)
}
