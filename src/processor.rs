use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::model::{KioskSnapshot, SessionIntent};
use crate::net::NetCommand;
use crate::serial::SerialCommand;
use crate::state::{Decision, KioskState};
use crate::store::{LedgerStore, SettingsStore};

/// 会话处理器：把意图交给协调器，再把决策分发成副作用
/// （串口命令、记账、设置落盘、快照发布）。
pub struct SessionProcessor {
    state: KioskState,
    ledger: Arc<Mutex<LedgerStore>>,
    settings_store: SettingsStore,
    serial_tx: Sender<SerialCommand>,
    net_tx: Sender<NetCommand>,
    snapshot: Arc<Mutex<KioskSnapshot>>,
}

impl SessionProcessor {
    pub fn new(
        state: KioskState,
        ledger: Arc<Mutex<LedgerStore>>,
        settings_store: SettingsStore,
        serial_tx: Sender<SerialCommand>,
        net_tx: Sender<NetCommand>,
        snapshot: Arc<Mutex<KioskSnapshot>>,
    ) -> Self {
        Self {
            state,
            ledger,
            settings_store,
            serial_tx,
            net_tx,
            snapshot,
        }
    }

    pub fn handle_intent(&mut self, intent: SessionIntent, now: Instant) {
        let decision = self.state.handle_intent(intent, now);
        self.apply(decision);
    }

    pub fn tick(&mut self, now: Instant) {
        let decision = self.state.tick(now);
        self.apply(decision);
    }

    fn apply(&mut self, decision: Decision) {
        for command in &decision.commands {
            let _ = self.serial_tx.send(*command);
        }
        if let Some((bay, amount)) = decision.coin_recorded {
            // 本地先行：记账绝不等待网络
            if let Ok(mut ledger) = self.ledger.lock() {
                if let Err(err) = ledger.record_coin(bay, amount) {
                    log::warn!("Ledger write failed: {}", err);
                }
            }
            let _ = self.net_tx.send(NetCommand::PushLedger);
        }
        if decision.settings_changed {
            if let Err(err) = self.settings_store.save(&self.state.settings) {
                log::warn!("Settings write failed: {}", err);
            }
        }
        if let Ok(mut snapshot) = self.snapshot.lock() {
            *snapshot = self.state.snapshot();
        }
    }
}
