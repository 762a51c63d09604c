//! Dependency addresses: `Name`, `Name/Output:k`, `Name/Input:k`,
//! `Output:k` and `Input:k`.

use std::fmt;

use crate::error::GraphError;

/// Reserved name of the graph's input boundary.
pub const INPUT: &str = "Input";
/// Reserved name of the graph's output boundary.
pub const OUTPUT: &str = "Output";

/// Which side of an operation a port suffix names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// `/Input:k`
    Input,
    /// `/Output:k`
    Output,
}

/// A parsed dependency address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Operation (or reserved boundary) name.
    pub name: String,
    /// Explicit slot, if the address carried one.
    pub slot: Option<usize>,
    /// Port suffix kind; `None` for bare names and reserved boundary forms.
    pub kind: Option<PortKind>,
}

impl Address {
    /// Slot, or `default` when the address has none.
    pub fn slot_or(&self, default: usize) -> usize {
        self.slot.unwrap_or(default)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.slot) {
            (Some(PortKind::Input), Some(k)) => write!(f, "{}/Input:{k}", self.name),
            (Some(PortKind::Output), Some(k)) => write!(f, "{}/Output:{k}", self.name),
            (None, Some(k)) => write!(f, "{}:{k}", self.name),
            _ => f.write_str(&self.name),
        }
    }
}

/// An `(operation, slot)` pair after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Port {
    /// Operation name.
    pub op: String,
    /// Input or output slot.
    pub slot: usize,
}

impl Port {
    /// Creates a port.
    pub fn new(op: impl Into<String>, slot: usize) -> Self {
        Self {
            op: op.into(),
            slot,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.op, self.slot)
    }
}

/// Parses a dependency address.
///
/// ```rust
/// use rfstream_core::graph::{parse_address, PortKind};
///
/// let a = parse_address("Beamformer/Output:1").unwrap();
/// assert_eq!((a.name.as_str(), a.slot, a.kind), ("Beamformer", Some(1), Some(PortKind::Output)));
///
/// let top = parse_address("Output:0").unwrap();
/// assert_eq!((top.name.as_str(), top.slot), ("Output", Some(0)));
///
/// // Bare names may contain ':' (generated names look like "Clip:0").
/// assert_eq!(parse_address("Clip:0").unwrap().slot, None);
///
/// assert!(parse_address("A/Foo:1").is_err());
/// ```
pub fn parse_address(address: &str) -> Result<Address, GraphError> {
    let invalid = || GraphError::InvalidAddress(address.to_string());
    let trimmed = address.trim();

    for reserved in [INPUT, OUTPUT] {
        if let Some(slot) = reserved_slot(trimmed, reserved) {
            return Ok(Address {
                name: reserved.to_string(),
                slot: Some(slot.ok_or_else(invalid)?),
                kind: None,
            });
        }
    }

    let mut parts = trimmed.split('/');
    let name = parts.next().unwrap_or_default();
    let suffix = parts.next();
    if parts.next().is_some() || name.is_empty() {
        return Err(invalid());
    }

    let Some(suffix) = suffix else {
        return Ok(Address {
            name: name.to_string(),
            slot: None,
            kind: None,
        });
    };

    let (kind, slot) = if let Some(slot) = suffix.strip_prefix("Output:") {
        (PortKind::Output, slot)
    } else if let Some(slot) = suffix.strip_prefix("Input:") {
        (PortKind::Input, slot)
    } else {
        return Err(invalid());
    };
    let slot = parse_slot(slot).ok_or_else(invalid)?;

    Ok(Address {
        name: name.to_string(),
        slot: Some(slot),
        kind: Some(kind),
    })
}

/// `Some(Some(k))` for `"<reserved>:k"`, `Some(None)` for a malformed slot
/// after `"<reserved>:"`, `None` when `address` is not the reserved form.
fn reserved_slot(address: &str, reserved: &str) -> Option<Option<usize>> {
    let rest = address.strip_prefix(reserved)?.strip_prefix(':')?;
    Some(parse_slot(rest))
}

fn parse_slot(slot: &str) -> Option<usize> {
    if slot.is_empty() || !slot.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    slot.parse().ok()
}
