//! # CodeSet Negotiation
//!
//! Narrow/wide text encoding selection, negotiated once per connection.
//!
//! Each side advertises a native encoding id and an ordered fallback list,
//! one pair each for narrow (char) and wide (wchar) text. Negotiation picks
//! a mutually understood id per kind; finding none is fatal at connection
//! setup. Unknown ids in a peer's fallback list are tolerated and skipped.
//!
//! Converters are selected lazily on the first text field and cached. The
//! cache is invalidated exactly once: the connection's own codeset metadata
//! is itself header data, decoded with a fixed bootstrap encoding, and the
//! negotiated result replaces the bootstrap the moment it is known.

pub mod converter;

use crate::core::{CdrReader, CdrWriter};
use crate::error::{CdrError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use converter::{NarrowConverter, WideConverter};

/// OSF charset registry ids understood by this crate.
pub mod ids {
    /// ISO 8859-1 (Latin-1)
    pub const ISO_8859_1: u32 = 0x0001_0001;
    /// ISO 646 (ASCII)
    pub const ISO_646: u32 = 0x0001_0020;
    /// UCS-2, level 1
    pub const UCS_2: u32 = 0x0001_0100;
    /// UTF-16
    pub const UTF_16: u32 = 0x0001_0109;
    /// UTF-8
    pub const UTF_8: u32 = 0x0501_0001;
}

/// One side's encoding descriptor for one text kind: a native id plus
/// ordered fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSetComponent {
    pub native: u32,
    pub conversion: Vec<u32>,
}

impl CodeSetComponent {
    pub fn new(native: u32, conversion: Vec<u32>) -> Self {
        CodeSetComponent { native, conversion }
    }
}

/// The connection-level pair of descriptors: narrow and wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSetComponentInfo {
    pub narrow: CodeSetComponent,
    pub wide: CodeSetComponent,
}

impl CodeSetComponentInfo {
    /// The descriptors this crate advertises by default.
    pub fn local_default() -> Self {
        CodeSetComponentInfo {
            narrow: CodeSetComponent::new(ids::ISO_8859_1, vec![ids::UTF_8, ids::ISO_646]),
            wide: CodeSetComponent::new(ids::UTF_16, vec![ids::UCS_2]),
        }
    }

    /// Decode from the connection metadata wire form: for each kind, a
    /// 4-byte native id, a 4-byte count, and count 4-byte fallback ids.
    pub fn read(reader: &mut CdrReader) -> Result<Self> {
        let narrow = Self::read_component(reader)?;
        let wide = Self::read_component(reader)?;
        Ok(CodeSetComponentInfo { narrow, wide })
    }

    fn read_component(reader: &mut CdrReader) -> Result<CodeSetComponent> {
        let native = reader.read_u32()?;
        let count = reader.read_u32()?;
        let mut conversion = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            conversion.push(reader.read_u32()?);
        }
        Ok(CodeSetComponent { native, conversion })
    }

    /// Encode to the connection metadata wire form.
    pub fn write(&self, writer: &mut CdrWriter) -> Result<()> {
        for component in [&self.narrow, &self.wide] {
            writer.write_u32(component.native)?;
            writer.write_u32(component.conversion.len() as u32)?;
            for &id in &component.conversion {
                writer.write_u32(id)?;
            }
        }
        Ok(())
    }
}

/// Pick one mutually understood id for one text kind. `known` filters ids to
/// those this implementation can actually convert; unknown ids anywhere are
/// skipped, never fatal on their own.
fn negotiate_component(
    kind: &'static str,
    local: &CodeSetComponent,
    remote: &CodeSetComponent,
    known: fn(u32) -> bool,
) -> Result<u32> {
    let chosen = if local.native == remote.native && known(local.native) {
        Some(local.native)
    } else if known(local.native) && remote.conversion.contains(&local.native) {
        Some(local.native)
    } else if known(remote.native) && local.conversion.contains(&remote.native) {
        Some(remote.native)
    } else {
        local
            .conversion
            .iter()
            .copied()
            .find(|id| known(*id) && remote.conversion.contains(id))
    };

    match chosen {
        Some(id) => {
            debug!(kind, id, "codeset negotiated");
            Ok(id)
        }
        None => Err(CdrError::CodeSetMismatch { kind }),
    }
}

/// Negotiate both kinds between a local and a remote descriptor pair.
pub fn negotiate(
    local: &CodeSetComponentInfo,
    remote: &CodeSetComponentInfo,
) -> Result<(u32, u32)> {
    let narrow = negotiate_component("narrow", &local.narrow, &remote.narrow, |id| {
        NarrowConverter::for_id(id).is_some()
    })?;
    let wide = negotiate_component("wide", &local.wide, &remote.wide, |id| {
        WideConverter::for_id(id).is_some()
    })?;
    Ok((narrow, wide))
}

/// Per-connection converter cache.
///
/// Starts on the bootstrap encodings (ISO 8859-1 / UTF-16) so the codeset
/// metadata itself can be decoded; [`CodeSetContext::apply_negotiation`]
/// swaps in the negotiated ids and drops the cached converters, exactly
/// once.
#[derive(Debug, Clone)]
pub struct CodeSetContext {
    narrow_id: u32,
    wide_id: u32,
    narrow: Option<NarrowConverter>,
    wide: Option<WideConverter>,
    sealed: bool,
}

impl Default for CodeSetContext {
    fn default() -> Self {
        Self::bootstrap()
    }
}

impl CodeSetContext {
    /// The fixed bootstrap encodings used before negotiation completes.
    pub fn bootstrap() -> Self {
        CodeSetContext {
            narrow_id: ids::ISO_8859_1,
            wide_id: ids::UTF_16,
            narrow: None,
            wide: None,
            sealed: false,
        }
    }

    /// A context already fixed on negotiated ids (e.g. duplicated streams).
    pub fn negotiated(narrow_id: u32, wide_id: u32) -> Self {
        CodeSetContext {
            narrow_id,
            wide_id,
            narrow: None,
            wide: None,
            sealed: true,
        }
    }

    /// Install the negotiated ids, invalidating any converters built against
    /// the bootstrap encodings. Subsequent calls are ignored: the negotiated
    /// result is immutable for the rest of the connection.
    pub fn apply_negotiation(&mut self, narrow_id: u32, wide_id: u32) {
        if self.sealed {
            return;
        }
        self.narrow_id = narrow_id;
        self.wide_id = wide_id;
        self.narrow = None;
        self.wide = None;
        self.sealed = true;
        debug!(
            narrow = narrow_id,
            wide = wide_id,
            "converter cache invalidated after negotiation"
        );
    }

    pub fn narrow_id(&self) -> u32 {
        self.narrow_id
    }

    pub fn wide_id(&self) -> u32 {
        self.wide_id
    }

    /// The narrow converter, built on first use and cached.
    pub fn narrow(&mut self) -> Result<NarrowConverter> {
        if let Some(conv) = self.narrow {
            return Ok(conv);
        }
        let conv = NarrowConverter::for_id(self.narrow_id)
            .ok_or(CdrError::CodeSetMismatch { kind: "narrow" })?;
        self.narrow = Some(conv);
        Ok(conv)
    }

    /// The wide converter, built on first use and cached.
    pub fn wide(&mut self) -> Result<WideConverter> {
        if let Some(conv) = self.wide {
            return Ok(conv);
        }
        let conv = WideConverter::for_id(self.wide_id)
            .ok_or(CdrError::CodeSetMismatch { kind: "wide" })?;
        self.wide = Some(conv);
        Ok(conv)
    }
}
