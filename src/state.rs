use std::time::Instant;

use crate::bay::BaySession;
use crate::model::{
    Bay, KioskSettings, KioskSnapshot, LinkStatus, OperatorAction, SessionIntent,
};
use crate::serial::SerialCommand;

/// 一次意图处理的决策输出（串口命令 + 记账增量 + 设置落盘标记）。
#[derive(Default)]
pub struct Decision {
    pub commands: Vec<SerialCommand>,
    pub coin_recorded: Option<(Bay, u32)>,
    pub settings_changed: bool,
}

impl Decision {
    fn commands(commands: Vec<SerialCommand>) -> Self {
        Self {
            commands,
            ..Self::default()
        }
    }
}

/// 整机会话协调器：持有两条车道会话、投币归属指针与授权闸门。
/// 只存在于会话调度线程，字段不跨线程共享。
pub struct KioskState {
    pub settings: KioskSettings,
    water: BaySession,
    foaming: BaySession,
    /// 投币归属指针：唯一的投币接收器靠最近交互的车道消歧。
    last_interacted: Bay,
    dialog_open: bool,
    authorized: bool,
    link: LinkStatus,
}

impl KioskState {
    pub fn new(settings: KioskSettings, cached_authorized: bool) -> Self {
        Self {
            settings,
            water: BaySession::new(Bay::Water),
            foaming: BaySession::new(Bay::Foaming),
            last_interacted: Bay::Water,
            dialog_open: false,
            authorized: cached_authorized,
            link: LinkStatus::Disconnected,
        }
    }

    pub fn bay(&self, bay: Bay) -> &BaySession {
        match bay {
            Bay::Water => &self.water,
            Bay::Foaming => &self.foaming,
        }
    }

    fn bay_mut(&mut self, bay: Bay) -> &mut BaySession {
        match bay {
            Bay::Water => &mut self.water,
            Bay::Foaming => &mut self.foaming,
        }
    }

    pub fn authorized(&self) -> bool {
        self.authorized
    }

    /// 繁忙判定：投币对话框打开、任一车道在运行或还有信用。
    /// 用于抑制待机/吸引模式切换。
    pub fn busy(&self) -> bool {
        self.dialog_open
            || Bay::ALL.iter().any(|bay| {
                let session = self.bay(*bay);
                session.running() || session.credit() > 0
            })
    }

    pub fn handle_intent(&mut self, intent: SessionIntent, now: Instant) -> Decision {
        match intent {
            SessionIntent::Coin { amount } => self.handle_coin(amount, now),
            SessionIntent::Operator(action) => self.handle_operator(action, now),
            SessionIntent::Authorization(ok) => self.handle_authorization(ok),
            SessionIntent::Link(status) => {
                // 链路状态变化不触碰车道状态，信用与剩余时间照常保留
                if status != self.link {
                    log::debug!("Serial link {}", status.as_str());
                    match status {
                        LinkStatus::Connected => {
                            log::info!("Relay controller link restored")
                        }
                        LinkStatus::Disconnected if self.link == LinkStatus::Connected => {
                            log::warn!("Relay controller link lost, bay state preserved")
                        }
                        _ => {}
                    }
                    self.link = status;
                }
                Decision::default()
            }
        }
    }

    /// 1 Hz 心跳：驱动两条车道的时间衰减与倒计时提示。
    pub fn tick(&mut self, now: Instant) -> Decision {
        let mut commands = Vec::new();
        for bay in Bay::ALL {
            let outcome = self.bay_mut(bay).tick(now);
            if outcome.finished {
                log::info!("Bay {} finished, relay off, credit cleared", bay.as_str());
            }
            if outcome.wait_expired {
                log::info!("Bay {} coin wait timed out", bay.as_str());
                self.dialog_open = false;
            }
            commands.extend(outcome.commands);
        }
        Decision::commands(commands)
    }

    /// 投币路由：归属最近交互车道；未处于等待状态则记录并丢弃，
    /// 绝不默认记到另一条车道上。
    fn handle_coin(&mut self, amount: u32, now: Instant) -> Decision {
        if !self.authorized {
            log::warn!("Coin event ignored: machine unauthorized");
            return Decision::default();
        }
        let target = self.last_interacted;
        if !self.bay(target).accepts_coin(now) {
            log::info!(
                "Coin ignored: bay {} not waiting for coin (amount {})",
                target.as_str(),
                amount
            );
            return Decision::default();
        }

        let per_coin = self.settings.per_coin_seconds(target);
        let coin_unit = self.settings.coin_unit;
        let outcome = self
            .bay_mut(target)
            .coin_received(amount, per_coin, coin_unit, now);
        log::info!(
            "Coin inserted bay {}: +{} credit, +{}s (rate {}s per {})",
            target.as_str(),
            amount,
            outcome.seconds_added,
            per_coin,
            coin_unit
        );
        Decision {
            commands: outcome.commands,
            coin_recorded: Some((target, amount)),
            settings_changed: false,
        }
    }

    fn handle_operator(&mut self, action: OperatorAction, now: Instant) -> Decision {
        if !self.authorized {
            log::warn!("Operator action rejected: machine unauthorized");
            return Decision::default();
        }
        match action {
            OperatorAction::InsertCoin(bay) => {
                self.last_interacted = bay;
                self.dialog_open = true;
                let commands = self.bay_mut(bay).request_coin(now);
                log::info!("Insert coin requested for bay {}", bay.as_str());
                Decision::commands(commands)
            }
            OperatorAction::Start(bay) => {
                self.last_interacted = bay;
                match self.bay_mut(bay).start() {
                    Some(commands) => {
                        self.dialog_open = false;
                        log::info!("Bay {} started, relay on", bay.as_str());
                        Decision::commands(commands)
                    }
                    None => {
                        log::info!("Bay {}: no credit or already running", bay.as_str());
                        Decision::default()
                    }
                }
            }
            OperatorAction::Stop(bay) => {
                self.last_interacted = bay;
                match self.bay_mut(bay).stop() {
                    Some(commands) => {
                        self.dialog_open = false;
                        log::info!("Bay {} stopped manually, credit cleared", bay.as_str());
                        Decision::commands(commands)
                    }
                    None => Decision::default(),
                }
            }
            OperatorAction::DialogClosed(bay) => {
                self.dialog_open = false;
                log::info!("Coin dialog closed for bay {}", bay.as_str());
                Decision::commands(vec![SerialCommand::DisableCoin])
            }
            OperatorAction::SetTimer { bay, secs } => {
                self.settings.set_timer(bay, secs);
                log::info!("Timer for bay {} set to {}s per coin", bay.as_str(), secs);
                Decision {
                    settings_changed: true,
                    ..Decision::default()
                }
            }
        }
    }

    /// 授权裁定：吊销时立即停住两条车道并保持阻断，进程继续运行
    /// 以便远端补救命令仍可到达。
    fn handle_authorization(&mut self, ok: bool) -> Decision {
        if ok == self.authorized {
            return Decision::default();
        }
        self.authorized = ok;
        if ok {
            log::info!("Machine authorized, bay activity unblocked");
            return Decision::default();
        }
        log::error!("Machine unauthorized, blocking bay activity");
        let mut commands = Vec::new();
        for bay in Bay::ALL {
            if let Some(stop_commands) = self.bay_mut(bay).stop() {
                commands.extend(stop_commands);
            }
        }
        self.dialog_open = false;
        Decision::commands(commands)
    }

    pub fn snapshot(&self) -> KioskSnapshot {
        KioskSnapshot {
            water: self.water.snapshot(),
            foaming: self.foaming.snapshot(),
            busy: self.busy(),
            link: self.link,
            authorized: self.authorized,
        }
    }
}
