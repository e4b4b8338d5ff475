// 模块划分：串口链路、车道会话、调度管线、持久化与远端同步
mod api;
mod bay;
mod commands;
mod identity;
mod link;
mod model;
mod net;
mod pipeline;
mod processor;
mod serial;
mod serial_io;
mod state;
mod store;
mod upload;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::api::ApiConfig;
use crate::commands::spawn_command_listener;
use crate::identity::MachineIdentity;
use crate::link::{detect_serial_port, spawn_link_tasks};
use crate::net::spawn_network_loop;
use crate::pipeline::{spawn_session_loop, KioskChannels};
use crate::processor::SessionProcessor;
use crate::state::KioskState;
use crate::store::{LedgerStore, SettingsStore};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Carwash kiosk controller booting...");

    // 退出信号只置标志位，各循环自行收尾
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, shutdown.clone()) {
            log::warn!("Signal handler registration failed: {}", err);
        }
    }

    // 本地持久化：设置 + 账本（含离线授权缓存）
    let data_dir = PathBuf::from("json_data");
    let settings_store = SettingsStore::new(data_dir.join("carwash_settings.json"));
    let settings = settings_store.load();
    let ledger = Arc::new(Mutex::new(LedgerStore::load(
        data_dir.join("account_data.json"),
    )));
    let cached_authorized = ledger
        .lock()
        .map(|store| store.is_authorized())
        .unwrap_or(false);

    let identity = MachineIdentity::derive();
    log::info!(
        "Machine identity: {} (owner {})",
        identity.machine_id,
        identity.owner_id
    );
    let api = ApiConfig::from_env();

    // 会话协调器从缓存的授权裁定起步，联网核验随后覆盖
    let kiosk = KioskState::new(settings, cached_authorized);
    let snapshot = Arc::new(Mutex::new(kiosk.snapshot()));

    let KioskChannels {
        intent_tx,
        intent_rx,
        serial_cmd_tx,
        serial_cmd_rx,
        net_cmd_tx,
        net_cmd_rx,
    } = KioskChannels::new();

    let processor = SessionProcessor::new(
        kiosk,
        ledger.clone(),
        settings_store,
        serial_cmd_tx,
        net_cmd_tx,
        snapshot.clone(),
    );
    let _session_handle = spawn_session_loop(processor, intent_rx, shutdown.clone());

    // 串口链路：读/写线程对 + 固定间隔重连监督
    let port_path = detect_serial_port();
    log::info!("Using serial port {}", port_path);
    let (serial_rx_handle, serial_tx_handle) = spawn_link_tasks(
        port_path,
        intent_tx.clone(),
        serial_cmd_rx,
        shutdown.clone(),
    );

    // 远端：授权核验、账本推送、命令订阅
    let _net_handle = spawn_network_loop(
        ledger.clone(),
        identity.clone(),
        api.clone(),
        net_cmd_rx,
        intent_tx.clone(),
        shutdown.clone(),
    );
    let _command_handle = spawn_command_listener(api, identity, shutdown.clone());

    // 展示层适配器的接入点：操作员意图入口与只读快照
    let _operator_tx = intent_tx;
    let _ui_snapshot = snapshot;

    // 主线程只等退出信号
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(500));
    }

    // 先停读循环、关串口句柄，再退出进程
    log::info!("Shutdown requested, closing serial link...");
    let _ = serial_rx_handle.join();
    let _ = serial_tx_handle.join();
    log::info!("Carwash kiosk controller stopped");
}
