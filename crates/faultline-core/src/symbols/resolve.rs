//! DWARF-based source resolution for one loaded module.
//!
//! This is the allocation-permitted half of symbolication: it reads the
//! module file from disk, builds a `gimli` DWARF view over its debug
//! sections, and answers file/line (and, as a fallback, function name)
//! queries through `addr2line`. `SymbolLookup` builds these resolvers lazily
//! and only while memory allocation is allowed; the no-alloc fault path
//! relies on `dladdr` alone and leaves file/line fields empty.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use addr2line::Context;
use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId};
use object::{Object, ObjectSection, ObjectSegment};
use once_cell::sync::OnceCell;
use tracing::debug;

type OwnedReader = EndianArcSlice<RunTimeEndian>;

const DWARF_SECTIONS: &[(&str, &[&str])] = &[
    (".debug_abbrev", &[".debug_abbrev", "__debug_abbrev"]),
    (".debug_addr", &[".debug_addr", "__debug_addr"]),
    (".debug_info", &[".debug_info", "__debug_info"]),
    (".debug_line", &[".debug_line", "__debug_line"]),
    (".debug_line_str", &[".debug_line_str", "__debug_line_str"]),
    (".debug_ranges", &[".debug_ranges", "__debug_ranges"]),
    (".debug_rnglists", &[".debug_rnglists", "__debug_rnglists"]),
    (".debug_str", &[".debug_str", "__debug_str"]),
    (".debug_str_offsets", &[".debug_str_offsets", "__debug_str_offsets"]),
    (".debug_types", &[".debug_types", "__debug_types"]),
    (".debug_loc", &[".debug_loc", "__debug_loc"]),
    (".debug_loclists", &[".debug_loclists", "__debug_loclists"]),
    (".debug_frame", &[".debug_frame", "__debug_frame"]),
];

fn load_section_bytes(file: &object::File<'_>, names: &[&str]) -> Arc<[u8]>
{
    for name in names {
        if let Some(section) = file.section_by_name(name) {
            if let Ok(data) = section.uncompressed_data() {
                return match data {
                    Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes.to_vec()),
                    Cow::Owned(vec) => vec.into(),
                };
            }
        }
    }

    Arc::<[u8]>::from(Vec::new())
}

/// A resolved source position.
#[derive(Debug, Clone)]
pub(crate) struct SourcePosition
{
    pub file: String,
    pub line: Option<u32>,
}

/// Per-module DWARF resolver.
///
/// Owns the module's debug section bytes and a lazily built `addr2line`
/// context. Construction failures are reported as `None` by the factory and
/// logged at debug level; a module without usable debug info simply resolves
/// nothing.
pub(crate) struct DwarfResolver
{
    endian: RunTimeEndian,
    /// Runtime load address of the module.
    runtime_base: u64,
    /// Link-time address of the lowest loadable segment.
    link_base: u64,
    debug_sections: HashMap<&'static str, Arc<[u8]>>,
    context_cache: OnceCell<Context<OwnedReader>>,
}

impl DwarfResolver
{
    /// Load the module at `path` (mapped at `runtime_base`) and prepare its
    /// debug sections. Returns `None` when the file cannot be read or parsed.
    pub(crate) fn load(path: &Path, runtime_base: u64) -> Option<Self>
    {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!("cannot read module {}: {err}", path.display());
                return None;
            }
        };

        let file = match object::File::parse(&*bytes) {
            Ok(file) => file,
            Err(err) => {
                debug!("cannot parse module {}: {err}", path.display());
                return None;
            }
        };

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        // Lowest loadable segment address; the slide between this and the
        // runtime base converts runtime addresses to file addresses.
        let link_base = file.segments().map(|segment| segment.address()).min().unwrap_or(0);

        let mut debug_sections = HashMap::new();
        for (canonical, aliases) in DWARF_SECTIONS {
            debug_sections.insert(*canonical, load_section_bytes(&file, aliases));
        }

        Some(Self {
            endian,
            runtime_base,
            link_base,
            debug_sections,
            context_cache: OnceCell::new(),
        })
    }

    /// Convert a runtime address into the module's file address space.
    fn file_address(&self, runtime_addr: u64) -> Option<u64>
    {
        runtime_addr
            .checked_sub(self.runtime_base)
            .and_then(|offset| offset.checked_add(self.link_base))
    }

    fn section_reader(&self, id: SectionId) -> OwnedReader
    {
        let data = self
            .debug_sections
            .get(id.name())
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        EndianArcSlice::new(data, self.endian)
    }

    fn context(&self) -> Option<&Context<OwnedReader>>
    {
        self.context_cache
            .get_or_try_init(|| {
                let dwarf = Dwarf::load(|section| Ok::<_, gimli::Error>(self.section_reader(section)))?;
                Context::from_dwarf(dwarf)
            })
            .map_err(|err: gimli::Error| {
                debug!("failed to build addr2line context: {err}");
                err
            })
            .ok()
    }

    /// Resolve a runtime address to a source file and line.
    pub(crate) fn find_source(&self, runtime_addr: u64) -> Option<SourcePosition>
    {
        let file_addr = self.file_address(runtime_addr)?;
        let ctx = self.context()?;

        let location = ctx.find_location(file_addr).ok()??;
        let file = location.file?.to_string();

        Some(SourcePosition {
            file,
            line: location.line,
        })
    }

    /// Resolve a runtime address to the innermost enclosing function's raw
    /// (mangled) name. Used as a fallback when the dynamic symbol table has
    /// no entry for the address.
    pub(crate) fn find_function(&self, runtime_addr: u64) -> Option<String>
    {
        let file_addr = self.file_address(runtime_addr)?;
        let ctx = self.context()?;

        let mut frames = ctx.find_frames(file_addr).skip_all_loads().ok()?;
        while let Ok(Some(frame)) = frames.next() {
            if let Some(function) = frame.function.as_ref() {
                if let Ok(raw) = function.raw_name() {
                    return Some(raw.to_string());
                }
            }
        }

        None
    }
}
