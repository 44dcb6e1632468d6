//! Patch substrate over in-memory module images.
//!
//! Images are registered per host load index, either as raw bytes with an
//! explicit symbol map or as an object file whose symbol table is read with
//! the `object` crate. Lookup patches rewrite the stored bytes; hooks are
//! recorded with synthetic trampoline addresses.

use std::collections::{BTreeMap, HashMap};

use object::{Object, ObjectSymbol};
use tracing::debug;

use super::{ModuleLoad, PatchSubstrate, Trampoline};
use crate::error::{AlcError, AlcResult};
use crate::facts::ModulePatch;
use crate::types::{Address, KernelVersion};

const TRAMPOLINE_BASE: u64 = 0xFFFF_FF80_0000_0000;
const TRAMPOLINE_STRIDE: u64 = 0x10;

#[derive(Debug, Clone)]
struct ModuleImage
{
    bytes: Vec<u8>,
    /// Symbol name to offset from the image start.
    symbols: BTreeMap<String, u64>,
}

/// Image-backed [`PatchSubstrate`].
#[derive(Debug, Clone)]
pub struct ImageSubstrate
{
    kernel: KernelVersion,
    images: HashMap<usize, ModuleImage>,
    hooks: Vec<Trampoline>,
    last_error: Option<String>,
}

impl ImageSubstrate
{
    /// Create a substrate for a given running kernel.
    #[must_use]
    pub fn new(kernel: KernelVersion) -> Self
    {
        Self {
            kernel,
            images: HashMap::new(),
            hooks: Vec::new(),
            last_error: None,
        }
    }

    /// Register raw image bytes with explicit symbol offsets.
    pub fn add_raw_image<I, S>(&mut self, index: usize, bytes: Vec<u8>, symbols: I)
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let symbols = symbols.into_iter().map(|(name, offset)| (name.into(), offset)).collect();
        self.images.insert(index, ModuleImage { bytes, symbols });
    }

    /// Register an object file (Mach-O, ELF, ...) and read its symbol table.
    ///
    /// # Errors
    ///
    /// Returns [`AlcError::Parse`] when the bytes are not a recognised object file.
    pub fn add_object_image(&mut self, index: usize, bytes: Vec<u8>) -> AlcResult<usize>
    {
        let symbols = {
            let file = object::File::parse(bytes.as_slice()).map_err(|err| AlcError::Parse(err.to_string()))?;
            let base = file.relative_address_base();
            let mut symbols = BTreeMap::new();
            for symbol in file.symbols() {
                if symbol.is_undefined() {
                    continue;
                }
                let Ok(name) = symbol.name() else {
                    continue;
                };
                if name.is_empty() {
                    continue;
                }
                symbols.insert(name.to_owned(), symbol.address().saturating_sub(base));
            }
            symbols
        };
        let count = symbols.len();
        debug!("image #{index}: {count} symbols");
        self.images.insert(index, ModuleImage { bytes, symbols });
        Ok(count)
    }

    /// Current bytes of an image.
    #[must_use]
    pub fn image(&self, index: usize) -> Option<&[u8]>
    {
        self.images.get(&index).map(|image| image.bytes.as_slice())
    }

    /// Hooks installed so far, in installation order.
    #[must_use]
    pub fn hooks(&self) -> &[Trampoline]
    {
        &self.hooks
    }

    /// Sticky error of the last failed operation.
    #[must_use]
    pub fn last_error(&self) -> Option<&str>
    {
        self.last_error.as_deref()
    }

    fn fail<T>(&mut self, err: AlcError) -> AlcResult<T>
    {
        self.last_error = Some(err.to_string());
        Err(err)
    }
}

/// Offsets of non-overlapping occurrences of `needle` in `haystack`.
fn occurrences(haystack: &[u8], needle: &[u8]) -> Vec<usize>
{
    let mut found = Vec::new();
    if needle.is_empty() || needle.len() > haystack.len() {
        return found;
    }
    let mut offset = 0;
    while offset + needle.len() <= haystack.len() {
        if &haystack[offset..offset + needle.len()] == needle {
            found.push(offset);
            offset += needle.len();
        } else {
            offset += 1;
        }
    }
    found
}

impl PatchSubstrate for ImageSubstrate
{
    fn kernel_version(&self) -> KernelVersion
    {
        self.kernel
    }

    fn resolve_symbol(&mut self, module: &ModuleLoad, name: &str) -> Option<Address>
    {
        let offset = self.images.get(&module.index).and_then(|image| image.symbols.get(name).copied());
        match offset {
            Some(offset) => module.base.checked_add(offset),
            None => {
                self.last_error = Some(format!("failed to solve {name}"));
                None
            }
        }
    }

    fn apply_lookup_patch(&mut self, module: &ModuleLoad, patch: &ModulePatch) -> AlcResult<()>
    {
        if patch.find.len() != patch.replace.len() {
            return self.fail(AlcError::Parse(format!(
                "patch sizes differ: find {} replace {}",
                patch.find.len(),
                patch.replace.len()
            )));
        }
        let Some(image) = self.images.get_mut(&module.index) else {
            return self.fail(AlcError::ModuleNotLoaded(module.index));
        };
        let limit = module.size.min(image.bytes.len());
        let mut hits = occurrences(&image.bytes[..limit], &patch.find);
        if hits.is_empty() {
            return self.fail(AlcError::PatternNotFound {
                module: module.id.to_string(),
                len: patch.find.len(),
            });
        }
        if patch.count != 0 {
            hits.truncate(patch.count);
        }
        for offset in &hits {
            image.bytes[*offset..*offset + patch.replace.len()].copy_from_slice(&patch.replace);
        }
        debug!("replaced {} occurrence(s) in {}", hits.len(), module.id);
        Ok(())
    }

    fn install_hook(&mut self, module: &ModuleLoad, symbol: &str) -> AlcResult<Trampoline>
    {
        if !self.images.contains_key(&module.index) {
            return self.fail(AlcError::ModuleNotLoaded(module.index));
        }
        let Some(original) = self.resolve_symbol(module, symbol) else {
            return self.fail(AlcError::SymbolNotFound {
                module: module.id.to_string(),
                symbol: symbol.to_owned(),
            });
        };
        if !original.within(module.base, module.size) {
            return self.fail(AlcError::OutOfImage(original));
        }
        let slot = self.hooks.len() as u64;
        let trampoline = Trampoline {
            symbol: symbol.to_owned(),
            original,
            trampoline: Address::new(TRAMPOLINE_BASE + slot * TRAMPOLINE_STRIDE),
        };
        self.hooks.push(trampoline.clone());
        Ok(trampoline)
    }

    fn clear_error(&mut self)
    {
        self.last_error = None;
    }
}
