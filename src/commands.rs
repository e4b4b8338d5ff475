use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::api::ApiConfig;
use crate::identity::MachineIdentity;
use crate::net::NetError;

const SUDO: &str = "/usr/bin/sudo";
const POLL_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_DELAY: Duration = Duration::from_secs(10);
// 即使远端静默掉线，订阅窗口也每 5 分钟整体重挂一次
const REATTACH_INTERVAL: Duration = Duration::from_secs(300);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[allow(dead_code)]
    message: Option<String>,
}

/// 远端命令文档。
#[derive(Deserialize)]
struct CommandDoc {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
}

/// 订阅远端命令队列并执行特权动作（重启/关机）。
/// 独立于会话调度运行，授权被吊销时仍然保持监听。
pub fn spawn_command_listener(
    api: ApiConfig,
    identity: MachineIdentity,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let client = match Client::builder().timeout(REQUEST_TIMEOUT).build() {
            Ok(client) => client,
            Err(err) => {
                log::error!("Command listener HTTP client init failed: {}", err);
                return;
            }
        };

        while !shutdown.load(Ordering::SeqCst) {
            log::info!("Attaching command listener for '{}'", identity.machine_id);
            let window_start = Instant::now();
            while window_start.elapsed() < REATTACH_INTERVAL && !shutdown.load(Ordering::SeqCst)
            {
                match fetch_commands(&client, &api, &identity.machine_id) {
                    Ok(docs) => {
                        for doc in docs {
                            handle_command(&client, &api, &identity.machine_id, doc);
                        }
                        sleep_interruptible(POLL_INTERVAL, &shutdown);
                    }
                    Err(err) => {
                        log::warn!("Command poll failed, retrying: {:?}", err);
                        sleep_interruptible(RETRY_DELAY, &shutdown);
                    }
                }
            }
        }
    })
}

fn fetch_commands(
    client: &Client,
    api: &ApiConfig,
    machine_id: &str,
) -> Result<Vec<CommandDoc>, NetError> {
    let url = api.commands_url(machine_id);
    let response = client
        .get(&url)
        .header("accept", "application/json")
        .send()?;
    let status = response.status().as_u16();
    let body = response.bytes()?;
    if !(200..300).contains(&status) {
        return Err(NetError::HttpStatus(status));
    }
    let payload: ApiResponse<Vec<CommandDoc>> = serde_json::from_slice(&body)?;
    if !payload.success {
        return Err(NetError::Api("command fetch failed".to_string()));
    }
    Ok(payload.data.unwrap_or_default())
}

/// 处理一条命令：必须先从远端删除，再执行副作用。
/// 删除失败就放弃执行，保证至多一次语义。
fn handle_command(client: &Client, api: &ApiConfig, machine_id: &str, doc: CommandDoc) {
    let kind = doc.kind.trim().to_lowercase();
    log::info!("Remote command received: '{}'", kind);
    if let Err(err) = delete_command(client, api, machine_id, &doc.id) {
        log::warn!(
            "Could not delete command '{}', skipping execution: {:?}",
            kind,
            err
        );
        return;
    }
    dispatch(&kind);
}

fn delete_command(
    client: &Client,
    api: &ApiConfig,
    machine_id: &str,
    command_id: &str,
) -> Result<(), NetError> {
    let url = api.command_delete_url(machine_id, command_id);
    let response = client.delete(&url).send()?;
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        return Err(NetError::HttpStatus(status));
    }
    Ok(())
}

/// 命令名到特权动作参数的映射，未识别的命令返回 None。
fn command_argv(kind: &str) -> Option<&'static [&'static str]> {
    match kind {
        "reboot" | "restart_device" | "restart_pi" => Some(&["reboot"]),
        "restart_app" | "app_restart" => Some(&["systemctl", "restart", "carwash.service"]),
        "shutdown" | "poweroff" => Some(&["shutdown", "now"]),
        _ => None,
    }
}

/// 执行特权命令；失败只记日志，不自动重试
/// （操作员重发时监听器自然会再次收到）。
fn dispatch(kind: &str) {
    let Some(argv) = command_argv(kind) else {
        log::info!("Unknown command '{}' ignored", kind);
        return;
    };
    match Command::new(SUDO)
        .args(argv)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(_) => log::info!("Privileged command dispatched: {}", kind),
        Err(err) => log::error!("Command execution failed: {}", err),
    }
}

fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) {
    let slice = Duration::from_millis(100);
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep(slice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_aliases_map_to_privileged_actions() {
        for alias in ["reboot", "restart_device", "restart_pi"] {
            assert_eq!(command_argv(alias), Some(&["reboot"][..]));
        }
        for alias in ["restart_app", "app_restart"] {
            assert_eq!(
                command_argv(alias),
                Some(&["systemctl", "restart", "carwash.service"][..])
            );
        }
        for alias in ["shutdown", "poweroff"] {
            assert_eq!(command_argv(alias), Some(&["shutdown", "now"][..]));
        }
    }

    #[test]
    fn unknown_commands_are_dropped() {
        assert_eq!(command_argv(""), None);
        assert_eq!(command_argv("format_disk"), None);
    }

    #[test]
    fn command_kind_is_normalized_like_the_doc_field() {
        // handle_command 在查表前做 trim + 小写
        assert_eq!(command_argv(" Reboot ".trim().to_lowercase().as_str()), Some(&["reboot"][..]));
    }
}
