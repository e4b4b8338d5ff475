use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::api::{ApiConfig, CONNECTIVITY_PROBE_URL};
use crate::identity::MachineIdentity;
use crate::model::SessionIntent;
use crate::store::LedgerStore;
use crate::upload::LedgerUpload;

// 本地事件之外的兜底重推间隔，限制远端账本的最大滞后。
const LEDGER_REPUSH_INTERVAL: Duration = Duration::from_secs(120);
// 启动核验之后的周期性复核间隔。
const AUTH_RECHECK_INTERVAL: Duration = Duration::from_secs(600);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// 网络线程的命令。
#[derive(Clone, Copy, Debug)]
pub enum NetCommand {
    /// 推送账本绝对值。
    PushLedger,
    /// 重新核验机器授权。
    CheckAuthorization,
}

#[derive(Debug)]
pub enum NetError {
    Http(reqwest::Error),
    Json(serde_json::Error),
    HttpStatus(u16),
    Api(String),
}

impl From<reqwest::Error> for NetError {
    fn from(err: reqwest::Error) -> Self {
        NetError::Http(err)
    }
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        NetError::Json(err)
    }
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

/// 机器授权记录：记录存在即视为已授权，字段内容不参与判定。
#[derive(Deserialize)]
struct MachineRecord {
    #[serde(default)]
    #[allow(dead_code)]
    machine_id: Option<String>,
}

/// 在线查询的三种结局。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LookupOutcome {
    /// 机器记录存在。
    Found,
    /// 远端明确没有该机器的记录。
    Missing,
    /// 后端不可用（网络本身是通的）。
    Unavailable,
}

/// 授权裁定规则（优先级同设计文档）：
/// 无网络 → 沿用本地缓存；记录存在 → 放行并缓存；记录缺失 →
/// 阻断并缓存；后端不可用 → 放行但不动缓存（fail-open）。
fn resolve_authorization(
    network_reachable: bool,
    cached: bool,
    lookup: LookupOutcome,
) -> (bool, Option<bool>) {
    if !network_reachable {
        return (cached, None);
    }
    match lookup {
        LookupOutcome::Found => (true, Some(true)),
        LookupOutcome::Missing => (false, Some(false)),
        LookupOutcome::Unavailable => (true, None),
    }
}

pub fn spawn_network_loop(
    ledger: Arc<Mutex<LedgerStore>>,
    identity: MachineIdentity,
    api: ApiConfig,
    command_rx: Receiver<NetCommand>,
    intent_tx: Sender<SessionIntent>,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let client = match Client::builder().timeout(REQUEST_TIMEOUT).build() {
            Ok(client) => client,
            Err(err) => {
                log::error!("HTTP client init failed: {}", err);
                return;
            }
        };

        // 启动核验：在车道活动放开之前下发首个裁定
        let verdict = check_authorized(&client, &api, &identity, &ledger);
        let _ = intent_tx.send(SessionIntent::Authorization(verdict));
        let mut last_auth_check = Instant::now();
        let mut last_push = Instant::now();

        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            match command_rx.recv_timeout(Duration::from_millis(500)) {
                Ok(NetCommand::PushLedger) => {
                    if let Err(err) = push_ledger(&client, &api, &identity, &ledger) {
                        log::warn!("Ledger push failed: {:?}", err);
                    }
                    last_push = Instant::now();
                }
                Ok(NetCommand::CheckAuthorization) => {
                    let verdict = check_authorized(&client, &api, &identity, &ledger);
                    let _ = intent_tx.send(SessionIntent::Authorization(verdict));
                    last_auth_check = Instant::now();
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            // 固定间隔兜底：即使某次推送静默失败，滞后也被限制住
            if last_push.elapsed() >= LEDGER_REPUSH_INTERVAL {
                if let Err(err) = push_ledger(&client, &api, &identity, &ledger) {
                    log::warn!("Periodic ledger push failed: {:?}", err);
                }
                last_push = Instant::now();
            }
            if last_auth_check.elapsed() >= AUTH_RECHECK_INTERVAL {
                let verdict = check_authorized(&client, &api, &identity, &ledger);
                let _ = intent_tx.send(SessionIntent::Authorization(verdict));
                last_auth_check = Instant::now();
            }
        }
    })
}

/// 核验机器授权并缓存裁定。离线时以本地缓存为唯一依据。
fn check_authorized(
    client: &Client,
    api: &ApiConfig,
    identity: &MachineIdentity,
    ledger: &Arc<Mutex<LedgerStore>>,
) -> bool {
    let cached = ledger
        .lock()
        .map(|store| store.is_authorized())
        .unwrap_or(false);

    let network_reachable = probe_connectivity(client);
    let lookup = if network_reachable {
        match fetch_machine_record(client, api, &identity.machine_id) {
            Ok(true) => LookupOutcome::Found,
            Ok(false) => LookupOutcome::Missing,
            Err(err) => {
                log::warn!("Authorization backend unavailable: {:?}", err);
                LookupOutcome::Unavailable
            }
        }
    } else {
        log::info!("No network, offline authorization fallback (cached={})", cached);
        LookupOutcome::Unavailable
    };

    let (verdict, cache_update) = resolve_authorization(network_reachable, cached, lookup);
    if let Some(value) = cache_update {
        if let Ok(mut store) = ledger.lock() {
            if let Err(err) = store.set_authorized(value) {
                log::warn!("Could not cache authorization verdict: {}", err);
            }
        }
    }
    match (network_reachable, lookup) {
        (true, LookupOutcome::Found) => {
            log::info!("Machine '{}' is authorized", identity.machine_id)
        }
        (true, LookupOutcome::Missing) => {
            log::error!("Machine '{}' not found in authorized machines", identity.machine_id)
        }
        (true, LookupOutcome::Unavailable) => {
            log::warn!("Authorization check inconclusive, failing open")
        }
        (false, _) => {}
    }
    verdict
}

/// 查询机器记录是否存在。404 与空数据都视为明确缺失。
fn fetch_machine_record(
    client: &Client,
    api: &ApiConfig,
    machine_id: &str,
) -> Result<bool, NetError> {
    let url = api.machine_url(machine_id);
    let response = client
        .get(&url)
        .header("accept", "application/json")
        .send()?;
    let status = response.status().as_u16();
    if status == 404 {
        return Ok(false);
    }
    let body = response.bytes()?;
    if !(200..300).contains(&status) {
        return Err(NetError::HttpStatus(status));
    }
    let payload: ApiResponse<MachineRecord> = serde_json::from_slice(&body)?;
    if !payload.success {
        return Err(NetError::Api(
            payload.message.unwrap_or_else(|| "request failed".to_string()),
        ));
    }
    Ok(payload.data.is_some())
}

/// 推送账本绝对值。离线直接推迟，不报错。
fn push_ledger(
    client: &Client,
    api: &ApiConfig,
    identity: &MachineIdentity,
    ledger: &Arc<Mutex<LedgerStore>>,
) -> Result<(), NetError> {
    if !probe_connectivity(client) {
        log::info!("Offline, ledger sync postponed");
        return Ok(());
    }
    let totals = match ledger.lock() {
        Ok(store) => store.totals(),
        Err(_) => return Ok(()),
    };
    let upload = LedgerUpload::new(identity, &totals, current_epoch());
    let payload = upload.to_json_string();
    let url = api.ledger_url();
    let response = client
        .post(&url)
        .header("content-type", "application/json")
        .body(payload)
        .send()?;
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        return Err(NetError::HttpStatus(status));
    }
    log::info!(
        "Ledger sync success: water={} foam={} total={}",
        totals.water_coins,
        totals.foaming_coins,
        totals.total_earnings()
    );
    Ok(())
}

/// 互联网连通性探测，用于区分"没网"与"后端挂了"。
fn probe_connectivity(client: &Client) -> bool {
    client
        .get(CONNECTIVITY_PROBE_URL)
        .timeout(PROBE_TIMEOUT)
        .send()
        .is_ok()
}

/// 当前秒级时间戳。
fn current_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_uses_cached_verdict_and_keeps_cache() {
        assert_eq!(
            resolve_authorization(false, true, LookupOutcome::Unavailable),
            (true, None)
        );
        assert_eq!(
            resolve_authorization(false, false, LookupOutcome::Unavailable),
            (false, None)
        );
    }

    #[test]
    fn backend_unavailable_fails_open_without_caching() {
        // 网络通但后端不可用：放行，且不得覆盖本地缓存
        assert_eq!(
            resolve_authorization(true, false, LookupOutcome::Unavailable),
            (true, None)
        );
        assert_eq!(
            resolve_authorization(true, true, LookupOutcome::Unavailable),
            (true, None)
        );
    }

    #[test]
    fn explicit_lookup_caches_both_verdicts() {
        assert_eq!(
            resolve_authorization(true, false, LookupOutcome::Found),
            (true, Some(true))
        );
        assert_eq!(
            resolve_authorization(true, true, LookupOutcome::Missing),
            (false, Some(false))
        );
    }
}
