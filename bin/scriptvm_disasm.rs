use anyhow::{Context, Result, anyhow};
use scriptvm_core::{Image, disassemble};
use std::{env, fs};

fn main() -> Result<()> {
    let input = env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("no input file provided"))?;
    let data = fs::read(&input).with_context(|| format!("failed to read {input}"))?;
    let image = Image::parse(input.clone(), data)?;
    print!("{}", disassemble(&image));
    Ok(())
}
