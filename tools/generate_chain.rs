//! Generate a committed seed chain file.
//!
//! Builds a hash chain from a random terminal seed, `seed[i] =
//! sha256(seed[i+1])`, and writes one hex seed per line in play order.
//! Committing the whole chain up front is what makes every future round's
//! outcome verifiable after its seed is revealed.

use std::io::Write;

use clap::Parser;
use rand::RngCore;
use sha2::{Digest, Sha256};

#[derive(Parser, Debug)]
#[command(name = "generate_chain")]
#[command(about = "Generate a committed seed chain file", long_about = None)]
struct Args {
    /// Output file, one hex seed per line
    #[arg(long, default_value = "chain.txt")]
    out: String,

    /// Number of rounds the chain covers
    #[arg(long, default_value = "1000000")]
    length: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut terminal = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut terminal);

    let mut chain = Vec::with_capacity(args.length);
    let mut current = terminal;
    for _ in 0..args.length {
        chain.push(current);
        let digest = Sha256::digest(current);
        current.copy_from_slice(&digest);
    }
    chain.reverse();

    let mut out = std::io::BufWriter::new(std::fs::File::create(&args.out)?);
    for seed in &chain {
        writeln!(out, "{}", hex::encode(seed))?;
    }
    out.flush()?;

    eprintln!("wrote {} seeds to {}", args.length, args.out);
    Ok(())
}
