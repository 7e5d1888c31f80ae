//! ---
//! wq_section: "03-networking"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Connection management for the telemetry link."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Strict dotted-quad parsing of the monitor address: exactly four octets,
//! decimal digits only, no leading zeros.
use std::net::Ipv4Addr;

use thiserror::Error;
use wq_common::PermittedRange;

/// Ways a configured monitor address can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Nothing but whitespace was supplied.
    #[error("monitor address is empty")]
    Empty,
    /// The address did not split into four octets.
    #[error("'{address}' must have 4 dot-separated octets, found {found}")]
    OctetCount {
        /// Offending address text.
        address: String,
        /// Number of dot-separated parts.
        found: usize,
    },
    /// An octet contained something other than decimal digits.
    #[error("octet '{octet}' of '{address}' is not a decimal number")]
    NotNumeric {
        /// Offending address text.
        address: String,
        /// Offending octet.
        octet: String,
    },
    /// A multi-digit octet started with zero.
    #[error("octet '{octet}' of '{address}' has a leading zero")]
    LeadingZero {
        /// Offending address text.
        address: String,
        /// Offending octet.
        octet: String,
    },
    /// An octet exceeded 255.
    #[error("octet '{octet}' of '{address}' is greater than 255")]
    OctetRange {
        /// Offending address text.
        address: String,
        /// Offending octet.
        octet: String,
    },
    /// The address parsed but lies outside the permitted range.
    #[error("{address} is outside the permitted range {range}")]
    NotPermitted {
        /// Parsed address.
        address: Ipv4Addr,
        /// Configured range.
        range: PermittedRange,
    },
}

/// Parse `text` as a strict dotted-quad IPv4 address.
pub fn parse_ipv4(text: &str) -> Result<Ipv4Addr, AddressError> {
    let address = text.trim();
    if address.is_empty() {
        return Err(AddressError::Empty);
    }
    let parts: Vec<&str> = address.split('.').collect();
    if parts.len() != 4 {
        return Err(AddressError::OctetCount {
            address: address.to_owned(),
            found: parts.len(),
        });
    }

    let mut octets = [0u8; 4];
    for (slot, part) in octets.iter_mut().zip(&parts) {
        let octet = || (address.to_owned(), (*part).to_owned());
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            let (address, octet) = octet();
            return Err(AddressError::NotNumeric { address, octet });
        }
        if part.len() > 1 && part.starts_with('0') {
            let (address, octet) = octet();
            return Err(AddressError::LeadingZero { address, octet });
        }
        *slot = match part.parse::<u8>() {
            Ok(value) => value,
            Err(_) => {
                let (address, octet) = octet();
                return Err(AddressError::OctetRange { address, octet });
            }
        };
    }
    Ok(Ipv4Addr::from(octets))
}

/// Validation applied to the monitor address before dialling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressPolicy {
    permitted: Option<PermittedRange>,
}

impl AddressPolicy {
    /// Policy with an optional inclusive range restriction.
    pub fn new(permitted: Option<PermittedRange>) -> Self {
        Self { permitted }
    }

    /// Configured range, if any.
    pub fn permitted(&self) -> Option<PermittedRange> {
        self.permitted
    }

    /// Parse the address and enforce the range restriction.
    pub fn validate(&self, text: &str) -> Result<Ipv4Addr, AddressError> {
        let address = parse_ipv4(text)?;
        match self.permitted {
            Some(range) if !range.contains(address) => {
                Err(AddressError::NotPermitted { address, range })
            }
            _ => Ok(address),
        }
    }
}
