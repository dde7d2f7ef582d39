//! IPv4 allow-list for the accepting socket.
//!
//! The list is given as semicolon-separated entries, each either a bare
//! address (`10.0.0.1`) or a CIDR block (`10.0.0.0/8`). A peer is
//! admitted iff its address lies in the union of the entries.

use crate::error::{ServerError, ServerResult};
use std::net::Ipv4Addr;

// Matching is purely numeric; no DNS and no IPv6-native ranges.

#[derive(Debug, Clone, Copy)]
struct Cidr {
    base: u32,
    mask: u32,
}

#[derive(Debug, Clone)]
pub struct AllowList {
    blocks: Vec<Cidr>,
}

impl AllowList {
    /// Parses `"ip;ip/prefix;…"`. Empty entries are skipped.
    pub fn parse(spec: &str) -> ServerResult<AllowList> {
        let mut blocks = Vec::new();
        for entry in spec.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (addr, prefix) = match entry.split_once('/') {
                Some((addr, prefix)) => {
                    let prefix: u32 = prefix
                        .parse()
                        .map_err(|_| ServerError::AllowList(entry.to_string()))?;
                    if prefix > 32 {
                        return Err(ServerError::AllowList(entry.to_string()));
                    }
                    (addr, prefix)
                }
                None => (entry, 32),
            };
            let addr: Ipv4Addr = addr
                .parse()
                .map_err(|_| ServerError::AllowList(entry.to_string()))?;
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - prefix)
            };
            blocks.push(Cidr {
                base: u32::from(addr) & mask,
                mask,
            });
        }
        Ok(AllowList { blocks })
    }

    pub fn permits(&self, addr: Ipv4Addr) -> bool {
        let addr = u32::from(addr);
        self.blocks.iter().any(|c| addr & c.mask == c.base)
    }
}
