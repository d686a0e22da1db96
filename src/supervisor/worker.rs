//! Worker process launching and termination.
//!
//! # Invocation
//! ```text
//! <program> <args...> <user> <live_config_path>
//!     -s <SYM1,SYM2,...> -m <market_type>
//!     -lw <long limit> -sw <short limit> -lm <long mode> -sm <short mode>
//!     [-ab <assigned balance>]
//! env INSTANCE_MANAGER_CONFIG=<resolved instance as JSON>
//! ```

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::config::schema::WorkerConfig;
use crate::resolve::ResolvedInstance;
use crate::supervisor::SupervisorError;

/// Environment variable carrying the resolved instance.
pub const CONFIG_ENV: &str = "INSTANCE_MANAGER_CONFIG";

/// Per-instance arguments appended after the configured ones.
pub fn worker_args(instance: &ResolvedInstance) -> Vec<String> {
    let mut args = vec![
        instance.user.clone(),
        instance.live_config_path.clone(),
        "-s".to_string(),
        instance.symbols.join(","),
        "-m".to_string(),
        instance.market_type.to_string(),
        "-lw".to_string(),
        instance.long_wallet_exposure_limit.to_string(),
        "-sw".to_string(),
        instance.short_wallet_exposure_limit.to_string(),
        "-lm".to_string(),
        instance.long_mode.to_string(),
        "-sm".to_string(),
        instance.short_mode.to_string(),
    ];
    if let Some(balance) = instance.explicit_balance() {
        args.push("-ab".to_string());
        args.push(balance.to_string());
    }
    args
}

/// Spawn the worker for `instance`.
pub fn spawn_worker(config: &WorkerConfig, instance: &ResolvedInstance) -> Result<Child, SupervisorError> {
    let payload = serde_json::to_string(instance).map_err(|source| SupervisorError::Encode {
        key: instance.identity_key.clone(),
        source,
    })?;

    let mut command = Command::new(&config.program);
    command
        .args(&config.args)
        .args(worker_args(instance))
        .env(CONFIG_ENV, payload)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        command.current_dir(dir);
    }

    command.spawn().map_err(|source| SupervisorError::Spawn {
        key: instance.identity_key.clone(),
        program: config.program.clone(),
        source,
    })
}

/// How a stop request ended.
#[derive(Debug)]
pub enum StopOutcome {
    /// Exited after the graceful signal.
    Graceful(ExitStatus),
    /// Did not exit in time and was killed.
    Killed,
}

/// Ask the child to exit, killing it once `timeout` elapses.
pub async fn terminate(child: &mut Child, timeout: Duration) -> std::io::Result<StopOutcome> {
    if let Some(status) = child.try_wait()? {
        return Ok(StopOutcome::Graceful(status));
    }

    send_graceful_signal(child)?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => Ok(StopOutcome::Graceful(status?)),
        Err(_) => {
            child.kill().await?;
            Ok(StopOutcome::Killed)
        }
    }
}

#[cfg(unix)]
fn send_graceful_signal(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // SAFETY: plain kill(2) on a pid we spawned and have not yet reaped.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_graceful_signal(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load;
    use crate::resolve::{resolve, ResolveOptions};

    fn instance(doc: &str) -> ResolvedInstance {
        let (defaults, specs) = load(doc).unwrap();
        resolve(&defaults, &specs, &ResolveOptions::default()).unwrap().remove(0)
    }

    #[test]
    fn test_args_without_balance() {
        let i = instance("defaults:\n  live_config_name: matic.json\ninstances:\n  - user: binance_01\n    symbols: [ETHUSDT, BTCUSDT]\n    short_mode: gs\n");
        assert_eq!(
            worker_args(&i),
            vec![
                "binance_01",
                "configs/live/matic.json",
                "-s",
                "ETHUSDT,BTCUSDT",
                "-m",
                "futures",
                "-lw",
                "0",
                "-sw",
                "0",
                "-lm",
                "n",
                "-sm",
                "gs",
            ]
        );
    }

    #[test]
    fn test_args_with_explicit_balance() {
        let i = instance("defaults:\n  live_config_name: matic.json\n  assigned_balance: 1500.5\n  long_wallet_exposure_limit: 0.25\ninstances:\n  - user: u\n    symbols: [X]\n    market_type: spot\n");
        let args = worker_args(&i);
        assert_eq!(&args[4..8], &["-m", "spot", "-lw", "0.25"]);
        assert_eq!(&args[args.len() - 2..], &["-ab", "1500.5"]);
    }
}
