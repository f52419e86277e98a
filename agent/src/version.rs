use clap::Args;
use common::Result;

#[derive(Args, Debug)]
pub struct Parameters {}

pub async fn run(_args: &Parameters) -> Result<()> {
    println!("{}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
