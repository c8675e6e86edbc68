use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use proctor_session::ReplayArgs;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = parse_args()?;
    if let Err(e) = proctor_session::run_replay(args).await {
        eprintln!("proctor-session fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn parse_args() -> Result<ReplayArgs> {
    let mut script = env::var("PROCTOR_REPLAY_SCRIPT").ok().map(PathBuf::from);
    let mut test = env::var("PROCTOR_REPLAY_TEST").ok().map(PathBuf::from);

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--script" => {
                script = Some(args.next().ok_or_else(|| anyhow!("--script missing value"))?.into());
            }
            "--test" => {
                test = Some(args.next().ok_or_else(|| anyhow!("--test missing value"))?.into());
            }
            _ => return Err(anyhow!("Unknown argument: {arg}")),
        }
    }

    let script = script.ok_or_else(|| anyhow!("--script is required"))?;
    Ok(ReplayArgs { script, test })
}
