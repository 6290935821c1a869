/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 1235;

/// Bound of the channels between the network thread and the driver.
pub const DEFAULT_TOKEN_CAPACITY: usize = 1024;

/// Session configuration. Fixed once the session is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Control port. `0` picks an ephemeral port, see
    /// [`Session::local_addr`](crate::Session::local_addr).
    pub port: u16,
    /// Address to listen on, all interfaces by default.
    pub host: IpAddr,
    /// Trace every byte and packet exchanged with the debugger.
    pub debug: bool,
    /// Reject (and negatively acknowledge) packets whose checksum does not
    /// match. Mismatches are only logged otherwise.
    pub strict_checksum: bool,
    pub token_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            debug: false,
            strict_checksum: false,
            token_capacity: DEFAULT_TOKEN_CAPACITY,
        }
    }
}

impl Config {
    pub fn new(port: u16) -> Self {
        Config {
            port,
            ..Default::default()
        }
    }

    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn strict_checksum(mut self, strict: bool) -> Self {
        self.strict_checksum = strict;
        self
    }

    pub fn token_capacity(mut self, capacity: usize) -> Self {
        self.token_capacity = capacity.max(1);
        self
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::new(0)
            .host(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .debug(true)
            .token_capacity(0);
        assert_eq!(config.addr(), "127.0.0.1:0".parse().unwrap());
        assert!(config.debug);
        assert!(!config.strict_checksum);
        assert_eq!(config.token_capacity, 1);
        assert_eq!(Config::default().addr().port(), DEFAULT_PORT);
    }
}
