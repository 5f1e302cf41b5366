// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minimal CLI that loads a bus and prints its resolved chains.
//!
//!  Build it with `cargo build --release --bin sluice`
//!  Usage: `sluice [config-file]`; falls back to SLUICE_CONFIG_FILE.

use std::env;
use std::error::Error;

use sluice::{info_fmt, Bus, ChainInitiator, Direction};

fn print_chains(title: &str, initiator: &ChainInitiator) -> Result<(), Box<dyn Error>> {
    for direction in [Direction::Inbound, Direction::Outbound] {
        let chain = initiator.chain(direction)?;
        println!("{title} {direction} ({} interceptors)", chain.len());
        print!("{chain}");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let config_file = env::args().nth(1).or_else(|| env::var("SLUICE_CONFIG_FILE").ok());

    // Env vars always apply; the file is optional.
    let mut loader = Bus::loader().with_env_vars();
    match config_file {
        Some(ref path) => {
            println!("Using configuration from {path}");
            loader = loader.with_config_file(path);
        }
        None => println!("No configuration file given, using defaults"),
    }

    let bus = match loader.build() {
        Ok(bus) => bus,
        Err(e) => {
            eprintln!("Failed to load bus: {e}");
            return Err(e.into());
        }
    };

    print_chains(&format!("bus '{}'", bus.name()), bus.initiator())?;
    for endpoint in bus.endpoints() {
        print_chains(&format!("endpoint '{}'", endpoint.name()), endpoint.initiator())?;
    }

    info_fmt!("Sluice", "Printed {} endpoint(s)", bus.endpoints().len());
    Ok(())
}
