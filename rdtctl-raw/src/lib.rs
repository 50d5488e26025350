//! # rdtctl-raw
//!
//! Register definitions for cache and memory bandwidth partitioning on x86
//! processors: Intel Resource Director Technology (CAT, CDP, MBA, CMT, MBM)
//! and the AMD Platform Quality of Service extensions.
//!
//! This crate is pure: it only encodes and decodes 64-bit register values.
//! Reading and writing the registers is left to the caller (see the
//! `rdtctl` agent crate).
//!
//! ## Usage
//!
//! ```
//! use rdtctl_raw::rdt::assoc::{decode_association, encode_association};
//!
//! // Move a core to COS 3 while keeping its RMID and reserved bits.
//! let current = 0x0000_0001_0000_0405;
//! let (_, rmid) = decode_association(current);
//! let raw = encode_association(3, rmid as u64, current)?;
//! assert_eq!(decode_association(raw), (3, 5));
//! # Ok::<(), rdtctl_raw::RegisterError>(())
//! ```

pub mod error;
pub mod rdt;
pub mod register;

pub use error::{RegisterError, Result};
pub use register::{BitField, RegisterLayout};
