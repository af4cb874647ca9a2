/* ulmld executable generator
 *
 * The Executable owns all link state: the three segments, the global and
 * local symbol tables, the set of unresolved references, and the recorded
 * fixups. Inputs are fed in command-line order; archives contribute
 * lazily when they carry a __SYMTAB_INDEX member. Once every input is in,
 * link() places the segments and rewrites the fixup sites.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use indexmap::IndexMap;

use crate::archive::Archive;
use crate::context::Group;
use crate::error::{LinkError, Result};
use crate::obj;
use crate::search::Paths;
use crate::segment::{align_up_to, Segment};

/* the three segments, in placement order */
pub const TEXT: usize = 0;
pub const DATA: usize = 1;
pub const BSS: usize = 2;

/* the archive member ulmranlib maintains, mapping defined symbols to the
   members that provide them */
pub const SYMTAB_INDEX: &str = "__SYMTAB_INDEX";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SymEntry
{
    pub kind: char,
    pub value: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FixKind
{
    Absolute,
    Relative,
    Word(u32),
}

/* a deferred byte patch, recorded during parsing and applied once after
   placement. addr is a segment offset by the time it is stored here */
pub struct FixEntry
{
    pub segment: usize, /* TEXT or DATA */
    pub addr: u64,
    pub offset: u64,
    pub num_bytes: u64,
    pub kind: FixKind,
    pub displace: i64,
}

/* describe the executable to generate from merging the inputs */
pub struct Executable
{
    pub segments: [Segment; 3],
    sym_tab: BTreeMap<String, SymEntry>,
    local_sym_tab: BTreeMap<String, Vec<SymEntry>>,
    unresolved: HashSet<String>,
    fixups: IndexMap<String, Vec<FixEntry>>,
}

impl Executable
{
    pub fn new(fill: u8) -> Executable
    {
        Executable
        {
            segments:
            [
                Segment::new("text", fill),
                Segment::new("data", fill),
                Segment::new("bss", fill),
            ],
            sym_tab: BTreeMap::new(),
            local_sym_tab: BTreeMap::new(),
            unresolved: HashSet::new(),
            fixups: IndexMap::new(),
        }
    }

    /* record a global definition. a second definition of the same ident
       is always fatal, however equal the two might be */
    pub fn define(&mut self, ident: &str, kind: char, value: u64, source: &str) -> Result<()>
    {
        if self.sym_tab.contains_key(ident)
        {
            return Err(LinkError::msg(format!(
                "multiple definition of `{}' in {}", ident, source)));
        }
        self.sym_tab.insert(String::from(ident), SymEntry { kind, value });
        Ok(())
    }

    pub fn define_local(&mut self, ident: &str, kind: char, value: u64)
    {
        self.local_sym_tab.entry(String::from(ident)).or_insert_with(Vec::new)
            .push(SymEntry { kind, value });
    }

    /* a U reference joins the unresolved set unless an upper-case
       definition already satisfies it */
    pub fn reference(&mut self, ident: &str)
    {
        let defined = matches!(self.sym_tab.get(ident),
                               Some(entry) if entry.kind.is_ascii_uppercase());
        if !defined
        {
            self.unresolved.insert(String::from(ident));
        }
    }

    /* an upper-case definition takes the ident off the unresolved set */
    pub fn resolve(&mut self, ident: &str)
    {
        self.unresolved.remove(ident);
    }

    pub fn global(&self, ident: &str) -> Option<SymEntry>
    {
        self.sym_tab.get(ident).copied()
    }

    pub fn globals(&self) -> impl Iterator<Item = (&String, &SymEntry)>
    {
        self.sym_tab.iter()
    }

    pub fn locals(&self) -> impl Iterator<Item = (&String, &Vec<SymEntry>)>
    {
        self.local_sym_tab.iter()
    }

    pub fn add_fixup(&mut self, ident: &str, entry: FixEntry)
    {
        self.fixups.entry(String::from(ident)).or_insert_with(Vec::new).push(entry);
    }

    /* feed one input token into the link: a plain object path, an archive
       path, or a -lNAME library reference. returns the number of archive
       members pulled in to satisfy unresolved symbols; whole objects and
       index-less archives count zero, which is what makes group sweeps
       terminate */
    pub fn add_lib_or_object(&mut self, token: &str, paths: &Paths, only_libs: bool) -> Result<usize>
    {
        let mut file = String::from(token);
        let mut archive = None;

        if let Some(name) = token.strip_prefix("-l")
        {
            /* try {dir}/libNAME.a across the search directories in order;
               the first that opens as an archive wins */
            for dir in paths.iter()
            {
                let candidate = format!("{}/lib{}.a", dir, name);
                if let Some(opened) = Archive::open(Path::new(&candidate))?
                {
                    archive = Some(opened);
                    file = candidate;
                    break;
                }
            }
        }
        else
        {
            archive = Archive::open(Path::new(token))?;
        }

        let archive = match archive
        {
            Some(archive) => archive,
            None =>
            {
                if only_libs
                {
                    /* inside a group only archives take part */
                    return Ok(0);
                }

                let contents = std::fs::read_to_string(&file).map_err(|_|
                    if file.starts_with("-l")
                    {
                        LinkError::msg(format!("can not find {}", file))
                    }
                    else
                    {
                        LinkError::msg(format!("can not open {}", file))
                    })?;
                obj::read_segments(self, &contents, &file)?;
                return Ok(0);
            }
        };

        self.add_archive(&archive, &file)
    }

    /* loop through the group's archives over and over until a full sweep
       resolves nothing new */
    pub fn add_group(&mut self, group: &Group, paths: &Paths) -> Result<()>
    {
        loop
        {
            let mut pulled = 0;

            for member in group.iter()
            {
                pulled += self.add_lib_or_object(member, paths, true)?;
            }

            /* exit when we're done resolving references within this group */
            if pulled == 0
            {
                return Ok(());
            }
        }
    }

    /* pull members out of an archive. with a __SYMTAB_INDEX the pull is
       lazy, driven by the unresolved set; without one every member is
       linked in archive order */
    fn add_archive(&mut self, archive: &Archive, file: &str) -> Result<usize>
    {
        let index = match archive.member_data(SYMTAB_INDEX)
        {
            Some(data) => text_of(data, file, SYMTAB_INDEX)?,
            None =>
            {
                let names: Vec<String> = archive.members().map(|member| member.name.clone()).collect();
                for name in names
                {
                    let source = format!("{}({})", file, name);
                    let contents = member_text(archive, &name, file)?;
                    obj::read_segments(self, &contents, &source)?;
                }
                return Ok(0);
            }
        };

        let mut included = HashSet::new();
        let mut pulled = 0;

        while let Some(member) = self.read_symtab_index(&index)
        {
            if !included.insert(member.clone())
            {
                /* the index promised this member resolves something it
                   did not define last time around */
                return Err(LinkError::msg(format!(
                    "stale symbol index in {}: member {} resolves nothing", file, member)));
            }

            let source = format!("{}({})", file, member);
            let contents = member_text(archive, &member, file)?;
            obj::read_segments(self, &contents, &source)?;
            pulled += 1;
        }
        Ok(pulled)
    }

    /* scan __SYMTAB_INDEX lines (<kind> <ident> <member>) for the first
       member that defines a symbol we still need */
    fn read_symtab_index(&self, index: &str) -> Option<String>
    {
        for line in index.lines()
        {
            let mut fields = line.split_whitespace();
            let ident = match (fields.next(), fields.next())
            {
                (Some(_kind), Some(ident)) => ident,
                _ => continue,
            };
            let member = match fields.next()
            {
                Some(member) => member,
                None => continue,
            };

            if self.unresolved.contains(ident)
            {
                return Some(String::from(member));
            }
        }
        None
    }

    /* place segments at their final addresses, turn symbol offsets into
       virtual addresses, and rewrite every fixup site */
    pub fn link(&mut self, text_base: u64) -> Result<()>
    {
        self.segments[TEXT].set_base_addr(text_base)?;

        let text_addr = self.segments[TEXT].base_addr();
        let data_addr = align_up_to(self.segments[TEXT].end_addr(),
                                    self.segments[DATA].alignment());
        self.segments[DATA].set_base_addr(data_addr)?;

        /* close the gap between text and data in the image */
        self.segments[TEXT].advance_to(data_addr)?;

        let bss_addr = align_up_to(self.segments[DATA].end_addr(),
                                   self.segments[BSS].alignment());
        self.segments[BSS].set_base_addr(bss_addr)?;

        for (ident, entry) in self.sym_tab.iter_mut()
        {
            match entry.kind
            {
                'T' => entry.value = entry.value.wrapping_add(text_addr),
                'D' => entry.value = entry.value.wrapping_add(data_addr),
                'B' => entry.value = entry.value.wrapping_add(bss_addr),
                'A' => (),
                other => return Err(LinkError::msg(format!(
                    "can not place symbol {} of kind '{}'", ident, other))),
            }
        }

        self.apply_fixups()
    }

    /* consume the recorded fixups, patching each site with a value derived
       from its target symbol, displacement and kind */
    fn apply_fixups(&mut self) -> Result<()>
    {
        let text_addr = self.segments[TEXT].base_addr();
        let data_addr = self.segments[DATA].base_addr();
        let bss_addr = self.segments[BSS].base_addr();

        let fixups = std::mem::take(&mut self.fixups);
        for (ident, entries) in &fixups
        {
            for fix in entries
            {
                let site = self.segments[fix.segment].base_addr().wrapping_add(fix.addr);

                let mut value = fix.displace as u64;
                match ident.as_str()
                {
                    "[text]" => value = value.wrapping_add(text_addr),
                    "[data]" => value = value.wrapping_add(data_addr),
                    "[bss]" => value = value.wrapping_add(bss_addr),
                    _ =>
                    {
                        let entry = self.sym_tab.get(ident).ok_or_else(||
                            LinkError::at(site, format!("Unresolved symbol {}", ident)))?;
                        value = value.wrapping_add(entry.value);
                    }
                }

                value = match fix.kind
                {
                    FixKind::Absolute => value,
                    FixKind::Relative =>
                    {
                        /* the stored field is a signed displacement in
                           4-byte instruction words */
                        let delta = value.wrapping_sub(site);
                        if delta % 4 != 0
                        {
                            return Err(LinkError::at(site, format!(
                                "relative target {} is not a multiple of 4 from the site", ident)));
                        }
                        delta / 4
                    }
                    FixKind::Word(word) => (value >> (16 * word)) & 0xFFFF,
                };

                self.segments[fix.segment].patch_bytes(
                    site.wrapping_add(fix.offset), fix.num_bytes, value)?;
            }
        }
        Ok(())
    }
}

fn member_text(archive: &Archive, member: &str, file: &str) -> Result<String>
{
    let data = archive.member_data(member).ok_or_else(|| LinkError::msg(format!(
        "archive {} has no member {}", file, member)))?;
    text_of(data, file, member)
}

/* the parser keeps what it needs, so copy the member out of the map */
fn text_of(data: &[u8], file: &str, member: &str) -> Result<String>
{
    String::from_utf8(data.to_vec()).map_err(|_| LinkError::msg(format!(
        "member {} of {} is not text", member, file)))
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::obj::read_segments;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn parse(exe: &mut Executable, contents: &str, source: &str)
    {
        read_segments(exe, contents, source).unwrap();
    }

    /* a scratch directory for archives and objects built on the fly */
    fn temp_dir(tag: &str) -> PathBuf
    {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let unique = NEXT.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir()
            .join(format!("ulmld-link-{}-{}-{}", tag, std::process::id(), unique));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_archive(dir: &Path, name: &str, members: &[(&str, &str)]) -> PathBuf
    {
        let mut image = Vec::from(crate::archive::MAGIC);
        for (member, body) in members
        {
            let field = format!("{}/", member);
            image.extend_from_slice(
                format!("{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n", field, 0, 0, 0, 644, body.len())
                    .as_bytes());
            image.extend_from_slice(body.as_bytes());
            if body.len() % 2 == 1
            {
                image.push(b'\n');
            }
        }

        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&image).unwrap();
        path
    }

    #[test]
    fn single_object_placement()
    {
        /* one word of text at 0x1000: no data, no bss */
        let mut exe = Executable::new(0xFD);
        parse(&mut exe, "#TEXT\n00112233\n", "a.o");
        exe.link(0x1000).unwrap();

        assert_eq!(exe.segments[TEXT].base_addr(), 0x1000);
        assert_eq!(exe.segments[TEXT].size(), 4);
        assert_eq!(exe.segments[DATA].size(), 0);
        assert_eq!(exe.segments[BSS].size(), 0);
    }

    #[test]
    fn placement_is_monotonic_and_aligned()
    {
        let mut exe = Executable::new(0xFD);
        parse(&mut exe, "#TEXT\n0011223344\n#DATA 16\nAA\n#BSS 8 128\n", "a.o");
        exe.link(0x1000).unwrap();

        let text = &exe.segments[TEXT];
        let data = &exe.segments[DATA];
        let bss = &exe.segments[BSS];
        assert!(text.base_addr() <= text.end_addr());
        assert!(text.end_addr() <= data.base_addr());
        assert!(data.end_addr() <= bss.base_addr());
        assert_eq!(data.base_addr() % data.alignment(), 0);
        assert_eq!(bss.base_addr() % bss.alignment(), 0);

        /* text was padded out to meet the data segment */
        assert_eq!(text.end_addr(), data.base_addr());
        assert_eq!(bss.size(), 128);
    }

    #[test]
    fn bss_follows_data_exactly_when_aligned()
    {
        /* data ends on an 8-byte boundary, so bss starts right there */
        let mut exe = Executable::new(0xFD);
        parse(&mut exe, "#TEXT\n0000000000000000\n#DATA\n1122334455667788\n#BSS 8 128\n", "a.o");
        exe.link(0x2000).unwrap();

        assert_eq!(exe.segments[DATA].end_addr(), 0x2010);
        assert_eq!(exe.segments[BSS].base_addr(), 0x2010);
        assert_eq!(exe.segments[BSS].size(), 128);
    }

    #[test]
    fn cross_unit_references_resolve()
    {
        /* a.o calls f, provided by b.o at text offset 4 */
        let mut exe = Executable::new(0xFD);
        parse(&mut exe, "#TEXT\n00000000\n#SYMTAB\nT main 0x0\nU f\n#FIXUPS\ntext 0 0 32 relative f\n", "a.o");
        parse(&mut exe, "#TEXT\nAABBCCDD\n#SYMTAB\nT f 0x0\n", "b.o");
        exe.link(0x1000).unwrap();

        assert_eq!(exe.global("main").unwrap().value, 0x1000);
        assert_eq!(exe.global("f").unwrap().value, 0x1004);

        /* (0x1004 - 0x1000) / 4 = 1, little-endian in four bytes */
        assert_eq!(&exe.segments[TEXT].bytes()[0..4], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn backward_relative_fixups_are_twos_complement()
    {
        let mut exe = Executable::new(0xFD);
        parse(&mut exe, "#TEXT\nAABBCCDD\n#SYMTAB\nT f 0x0\n", "a.o");
        parse(&mut exe, "#TEXT\n00000000\n#FIXUPS\ntext 0 0 32 relative f\n", "b.o");
        exe.link(0).unwrap();

        /* site 4, target 0: (0 - 4) / 4 = -1 */
        assert_eq!(&exe.segments[TEXT].bytes()[4..8], &[0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn word_fixups_pick_their_halfword()
    {
        let mut exe = Executable::new(0xFD);
        let object = "#TEXT\n0000\n#SYMTAB\nA S 0xDEADBEEFCAFEBABE\n#FIXUPS\ntext 0 0 16 w1 S\n";
        parse(&mut exe, object, "a.o");
        exe.link(0).unwrap();

        /* w1 selects bits 16..31: 0xBEEF, emitted little-endian */
        assert_eq!(exe.segments[TEXT].bytes(), &[0xEF, 0xBE]);
    }

    #[test]
    fn segment_self_references()
    {
        /* a data word holding the address of the unit's own data start */
        let mut exe = Executable::new(0xFD);
        parse(&mut exe, "#DATA\nFFFFFFFFFFFFFFFF\n#FIXUPS\ndata 0 0 64 absolute [data]+8\n", "a.o");
        exe.link(0x1000).unwrap();

        /* data lands right after the empty text segment at 0x1000 */
        let expect = (0x1000u64 + 8).to_le_bytes();
        assert_eq!(exe.segments[DATA].bytes(), &expect);
    }

    #[test]
    fn unresolved_symbols_fail_at_fixup_time()
    {
        let mut exe = Executable::new(0xFD);
        parse(&mut exe, "#TEXT\n00000000\n#SYMTAB\nU ghost\n#FIXUPS\ntext 0 0 32 absolute ghost\n", "a.o");
        let failed = exe.link(0).unwrap_err();
        assert!(format!("{}", failed).contains("Unresolved symbol ghost"));
    }

    #[test]
    fn misaligned_relative_targets_are_fatal()
    {
        let mut exe = Executable::new(0xFD);
        parse(&mut exe, "#TEXT\n0000000000\n#SYMTAB\nT f 0x5\n#FIXUPS\ntext 0 0 32 relative f\n", "a.o");
        assert!(exe.link(0).is_err());
    }

    #[test]
    fn placement_rejects_unknown_kinds()
    {
        let mut exe = Executable::new(0xFD);
        parse(&mut exe, "#TEXT\n00\n#SYMTAB\nQ odd 0x0\n", "a.o");
        assert!(exe.link(0).is_err());
    }

    #[test]
    fn indexed_archives_contribute_lazily()
    {
        let dir = temp_dir("lazy");
        let m1 = "#TEXT\n00000000\n#SYMTAB\nT f 0x0\n";
        let m2 = "#TEXT\n11111111\n#SYMTAB\nT g 0x0\n";
        let index = "T f                           m1.o\nT g                           m2.o\n";
        let lib = write_archive(&dir, "libx.a",
                                &[(SYMTAB_INDEX, index), ("m1.o", m1), ("m2.o", m2)]);

        let mut exe = Executable::new(0xFD);
        let paths = Paths::new();
        parse(&mut exe, "#TEXT\nAABBCCDD\n#SYMTAB\nU f\n", "a.o");
        let pulled = exe.add_lib_or_object(lib.to_str().unwrap(), &paths, false).unwrap();

        /* f pulls m1.o in; nothing needs m2.o so g stays out */
        assert_eq!(pulled, 1);
        assert!(exe.global("f").is_some());
        assert!(exe.global("g").is_none());
        assert_eq!(exe.segments[TEXT].size(), 8);

        /* linking the archive again pulls nothing new */
        let pulled = exe.add_lib_or_object(lib.to_str().unwrap(), &paths, false).unwrap();
        assert_eq!(pulled, 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn plain_archives_contribute_whole()
    {
        let dir = temp_dir("whole");
        let m1 = "#TEXT\n00000000\n#SYMTAB\nT f 0x0\n";
        let m2 = "#TEXT\n11111111\n#SYMTAB\nT g 0x0\n";
        let lib = write_archive(&dir, "liby.a", &[("m1.o", m1), ("m2.o", m2)]);

        let mut exe = Executable::new(0xFD);
        let paths = Paths::new();
        let pulled = exe.add_lib_or_object(lib.to_str().unwrap(), &paths, false).unwrap();

        assert_eq!(pulled, 0);
        assert!(exe.global("f").is_some());
        assert!(exe.global("g").is_some());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn library_references_search_in_order()
    {
        let dir = temp_dir("search");
        write_archive(&dir, "libz.a", &[("m.o", "#TEXT\n00\n#SYMTAB\nT z 0x0\n")]);

        let mut paths = Paths::new();
        paths.add(dir.to_str().unwrap());

        let mut exe = Executable::new(0xFD);
        exe.reference("z");
        exe.add_lib_or_object("-lz", &paths, false).unwrap();
        assert!(exe.global("z").is_some());

        /* a library that exists nowhere is fatal outside groups... */
        assert!(exe.add_lib_or_object("-lmissing", &paths, false).is_err());

        /* ...but quietly contributes nothing inside one */
        assert_eq!(exe.add_lib_or_object("-lmissing", &paths, true).unwrap(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn groups_reach_a_fixed_point()
    {
        /* libp needs q, libq needs p: only the group form resolves both */
        let dir = temp_dir("group");
        let p = "#TEXT\n00000000\n#SYMTAB\nT p 0x0\nU q\n";
        let q = "#TEXT\n11111111\n#SYMTAB\nT q 0x0\nU p\n";
        let libp = write_archive(&dir, "libp.a",
                                 &[(SYMTAB_INDEX, "T p                           p.o\n"), ("p.o", p)]);
        let libq = write_archive(&dir, "libq.a",
                                 &[(SYMTAB_INDEX, "T q                           q.o\n"), ("q.o", q)]);
        let paths = Paths::new();

        /* out of order and outside a group, q is never revisited */
        let mut exe = Executable::new(0xFD);
        exe.reference("p");
        exe.add_lib_or_object(libq.to_str().unwrap(), &paths, false).unwrap();
        exe.add_lib_or_object(libp.to_str().unwrap(), &paths, false).unwrap();
        assert!(exe.global("q").is_none());

        /* the same order inside a group sweeps until both resolve */
        let mut exe = Executable::new(0xFD);
        exe.reference("p");
        let mut group = Group::new();
        group.add(libq.to_str().unwrap());
        group.add(libp.to_str().unwrap());
        exe.add_group(&group, &paths).unwrap();
        assert!(exe.global("p").is_some());
        assert!(exe.global("q").is_some());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stale_indexes_are_fatal()
    {
        let dir = temp_dir("stale");
        let index = "T f                           m1.o\n";
        let m1 = "#TEXT\n00000000\n#SYMTAB\nT other 0x0\n";
        let lib = write_archive(&dir, "libstale.a", &[(SYMTAB_INDEX, index), ("m1.o", m1)]);

        let mut exe = Executable::new(0xFD);
        exe.reference("f");
        let paths = Paths::new();
        assert!(exe.add_lib_or_object(lib.to_str().unwrap(), &paths, false).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
