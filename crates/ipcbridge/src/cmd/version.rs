use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("ipcbridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: ipcbridge");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "wire: magic=\"IB\", header={} bytes, max_payload={}",
        ipcbridge_frame::HEADER_SIZE,
        ipcbridge_frame::DEFAULT_MAX_PAYLOAD
    );
    println!(
        "bridge: initial_buffer={}, callback={}",
        ipcbridge_core::DEFAULT_BUFFER_CAPACITY,
        ipcbridge_core::DEFAULT_CALLBACK_NAME
    );
    println!("features: cli=true");

    Ok(SUCCESS)
}
