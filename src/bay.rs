use std::time::{Duration, Instant};

use crate::model::{Bay, BaySnapshot};
use crate::serial::SerialCommand;

/// 投币等待超时。
pub const COIN_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
/// 单枚硬币脉冲的去抖窗口，窗口内的后续投币事件直接丢弃。
pub const COIN_REARM_WINDOW: Duration = Duration::from_millis(500);
/// 进入最后倒计时提示的剩余秒数阈值。
pub const LOW_TIME_WARNING_SECS: u32 = 10;

/// 单车道洗车会话状态机。实例随进程创建并存活到进程退出，
/// 只会被复位，不会被销毁。所有字段仅由会话调度线程修改。
pub struct BaySession {
    bay: Bay,
    remaining_secs: u32,
    running: bool,
    credit: u32,
    awaiting_coin: bool,
    coin_wait_deadline: Option<Instant>,
    rearm_deadline: Option<Instant>,
    warned_low_time: bool,
    beeping: bool,
}

/// 一次投币的处理结果。
pub struct CoinOutcome {
    pub seconds_added: u32,
    pub commands: Vec<SerialCommand>,
}

/// 一次 1 Hz 心跳的处理结果。
pub struct TickOutcome {
    /// 本次心跳把时间走完并完成了结束迁移。
    pub finished: bool,
    /// 投币等待超时且没有累计投币，已解除等待。
    pub wait_expired: bool,
    pub commands: Vec<SerialCommand>,
}

impl BaySession {
    pub fn new(bay: Bay) -> Self {
        Self {
            bay,
            remaining_secs: 0,
            running: false,
            credit: 0,
            awaiting_coin: false,
            coin_wait_deadline: None,
            rearm_deadline: None,
            warned_low_time: false,
            beeping: false,
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn credit(&self) -> u32 {
        self.credit
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    pub fn awaiting_coin(&self) -> bool {
        self.awaiting_coin
    }

    pub fn is_idle(&self) -> bool {
        !self.running && !self.awaiting_coin && self.credit == 0 && self.remaining_secs == 0
    }

    /// 操作员按下投币按钮：允许接收下一枚硬币并启动等待超时。
    /// 重复按下只是重置超时（对话框重新打开）。
    pub fn request_coin(&mut self, now: Instant) -> Vec<SerialCommand> {
        self.awaiting_coin = true;
        self.coin_wait_deadline = Some(now + COIN_WAIT_TIMEOUT);
        vec![SerialCommand::EnableCoin]
    }

    /// 当前是否接受投币：必须处于等待状态且不在去抖窗口内。
    pub fn accepts_coin(&self, now: Instant) -> bool {
        if !self.awaiting_coin {
            return false;
        }
        match self.rearm_deadline {
            Some(deadline) => now >= deadline,
            None => true,
        }
    }

    /// 投币：累计信用并按车道费率兑换洗车秒数。
    /// 调用方先用 accepts_coin 判定归属；金额兜底由协议层完成。
    pub fn coin_received(
        &mut self,
        amount: u32,
        per_coin_secs: u32,
        coin_unit: u32,
        now: Instant,
    ) -> CoinOutcome {
        let unit = coin_unit.max(1);
        let seconds_added = per_coin_secs.saturating_mul(amount / unit);
        self.credit = self.credit.saturating_add(amount);
        self.remaining_secs = self.remaining_secs.saturating_add(seconds_added);
        // 投币后不再计等待超时，但要经过去抖窗口才接收下一枚
        self.coin_wait_deadline = None;
        self.rearm_deadline = Some(now + COIN_REARM_WINDOW);

        let mut commands = Vec::new();
        if self.remaining_secs > LOW_TIME_WARNING_SECS && self.warned_low_time {
            // 续币把时间补回阈值之上，解除倒计时提示
            self.warned_low_time = false;
            commands.extend(self.stop_beeping());
        }
        CoinOutcome {
            seconds_added,
            commands,
        }
    }

    /// 启动：仅当有信用且未运行时生效，否则返回 None。
    pub fn start(&mut self) -> Option<Vec<SerialCommand>> {
        if self.credit == 0 || self.running {
            return None;
        }
        let mut commands = Vec::new();
        if self.awaiting_coin {
            self.awaiting_coin = false;
            self.coin_wait_deadline = None;
            commands.push(SerialCommand::DisableCoin);
        }
        self.running = true;
        self.warned_low_time = false;
        commands.push(SerialCommand::RelayOn(self.bay));
        Some(commands)
    }

    /// 手动停止：效果与时间走完相同。对已空闲车道是严格空操作。
    pub fn stop(&mut self) -> Option<Vec<SerialCommand>> {
        if self.is_idle() {
            return None;
        }
        Some(self.reset())
    }

    /// 1 Hz 心跳：唯一的时间衰减与到期断电权威。
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let mut commands = Vec::new();
        let mut wait_expired = false;

        // 投币等待是软超时，在心跳里检查；已累计投币则只清除期限
        if let Some(deadline) = self.coin_wait_deadline {
            if now >= deadline {
                self.coin_wait_deadline = None;
                if self.credit == 0 {
                    self.awaiting_coin = false;
                    wait_expired = true;
                    commands.push(SerialCommand::DisableCoin);
                }
            }
        }

        let mut finished = false;
        if self.running {
            // 剩余为零还在运行属于异常残留，同样走结束迁移兜底
            self.remaining_secs = self.remaining_secs.saturating_sub(1);
            if self.remaining_secs == 0 {
                commands.extend(self.reset());
                finished = true;
            } else if self.remaining_secs <= LOW_TIME_WARNING_SECS {
                // 倒计时提示子状态：每秒一声，由心跳驱动
                self.warned_low_time = true;
                self.beeping = true;
                commands.push(SerialCommand::BeepOn);
            }
        }

        TickOutcome {
            finished,
            wait_expired,
            commands,
        }
    }

    /// 结束/停止共用的复位迁移：断电、清信用、停提示音，一次完成。
    fn reset(&mut self) -> Vec<SerialCommand> {
        let mut commands = Vec::new();
        if self.awaiting_coin {
            self.awaiting_coin = false;
            commands.push(SerialCommand::DisableCoin);
        }
        self.coin_wait_deadline = None;
        self.rearm_deadline = None;
        self.running = false;
        self.remaining_secs = 0;
        self.credit = 0;
        self.warned_low_time = false;
        commands.extend(self.stop_beeping());
        commands.push(SerialCommand::RelayOff(self.bay));
        commands
    }

    /// 停止倒计时提示音。可重复调用（已停止时不再发命令）。
    fn stop_beeping(&mut self) -> Option<SerialCommand> {
        if self.beeping {
            self.beeping = false;
            Some(SerialCommand::BeepOff)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> BaySnapshot {
        BaySnapshot {
            remaining_secs: self.remaining_secs,
            credit: self.credit,
            running: self.running,
            awaiting_coin: self.awaiting_coin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(session: &mut BaySession, amount: u32, now: Instant) -> CoinOutcome {
        session.coin_received(amount, 60, 5, now)
    }

    #[test]
    fn request_coin_arms_bay_and_enables_acceptor() {
        let now = Instant::now();
        let mut session = BaySession::new(Bay::Water);
        let commands = session.request_coin(now);
        assert_eq!(commands, vec![SerialCommand::EnableCoin]);
        assert!(session.awaiting_coin());
        assert!(session.accepts_coin(now));
    }

    #[test]
    fn credit_accumulates_only_while_awaiting() {
        let now = Instant::now();
        let mut session = BaySession::new(Bay::Water);
        assert!(!session.accepts_coin(now));

        session.request_coin(now);
        coin(&mut session, 5, now);
        assert_eq!(session.credit(), 5);
        assert_eq!(session.remaining_secs(), 60);
    }

    #[test]
    fn debounce_window_blocks_immediate_second_pulse() {
        let now = Instant::now();
        let mut session = BaySession::new(Bay::Water);
        session.request_coin(now);
        coin(&mut session, 5, now);

        assert!(!session.accepts_coin(now + Duration::from_millis(100)));
        assert!(session.accepts_coin(now + COIN_REARM_WINDOW));
    }

    #[test]
    fn coin_amount_converts_by_integer_units() {
        let now = Instant::now();
        let mut session = BaySession::new(Bay::Foaming);
        session.request_coin(now);
        // 12 比索按两个 5 比索单位计
        let outcome = session.coin_received(12, 30, 5, now);
        assert_eq!(outcome.seconds_added, 60);
        assert_eq!(session.credit(), 12);
    }

    #[test]
    fn wait_timeout_disarms_only_without_credit() {
        let now = Instant::now();
        let mut session = BaySession::new(Bay::Water);
        session.request_coin(now);

        let late = now + COIN_WAIT_TIMEOUT + Duration::from_secs(1);
        let outcome = session.tick(late);
        assert!(outcome.wait_expired);
        assert!(!session.awaiting_coin());
        assert!(outcome.commands.contains(&SerialCommand::DisableCoin));

        // 超时后到达的投币不再被接受
        assert!(!session.accepts_coin(late));
    }

    #[test]
    fn wait_timeout_keeps_accrued_credit() {
        let now = Instant::now();
        let mut session = BaySession::new(Bay::Water);
        session.request_coin(now);
        coin(&mut session, 5, now);
        // 投币清除了等待期限，重新armed后的超时不清信用
        session.request_coin(now + Duration::from_secs(1));
        let outcome = session.tick(now + Duration::from_secs(30));
        assert!(!outcome.wait_expired);
        assert!(session.awaiting_coin());
        assert_eq!(session.credit(), 5);
    }

    #[test]
    fn start_requires_credit() {
        let mut session = BaySession::new(Bay::Water);
        assert!(session.start().is_none());
    }

    #[test]
    fn start_disables_acceptor_and_powers_relay() {
        let now = Instant::now();
        let mut session = BaySession::new(Bay::Water);
        session.request_coin(now);
        coin(&mut session, 5, now);

        let commands = session.start().expect("start with credit");
        assert_eq!(
            commands,
            vec![SerialCommand::DisableCoin, SerialCommand::RelayOn(Bay::Water)]
        );
        assert!(session.running());
        assert!(!session.awaiting_coin());
        // 已在运行时重复启动无效
        assert!(session.start().is_none());
    }

    #[test]
    fn tick_decrements_exactly_once_and_finishes_atomically() {
        let mut now = Instant::now();
        let mut session = BaySession::new(Bay::Water);
        session.request_coin(now);
        session.coin_received(5, 3, 5, now);
        session.start();

        for expected in (0..3).rev() {
            now += Duration::from_secs(1);
            let outcome = session.tick(now);
            assert_eq!(session.remaining_secs(), expected);
            // 不存在 remaining==0 && running && credit>0 的可观测状态
            if expected == 0 {
                assert!(outcome.finished);
                assert!(!session.running());
                assert_eq!(session.credit(), 0);
                assert!(outcome.commands.contains(&SerialCommand::RelayOff(Bay::Water)));
            } else {
                assert!(!outcome.finished);
                assert!(session.running());
            }
        }
    }

    #[test]
    fn countdown_warning_beeps_each_second_until_zero() {
        let mut now = Instant::now();
        let mut session = BaySession::new(Bay::Water);
        session.request_coin(now);
        session.coin_received(5, 12, 5, now);
        session.start();

        let mut beeps = 0;
        let mut beep_offs = 0;
        for _ in 0..12 {
            now += Duration::from_secs(1);
            let outcome = session.tick(now);
            beeps += outcome
                .commands
                .iter()
                .filter(|c| **c == SerialCommand::BeepOn)
                .count();
            beep_offs += outcome
                .commands
                .iter()
                .filter(|c| **c == SerialCommand::BeepOff)
                .count();
        }
        // 剩余 10..=1 的每个心跳各一声，结束时停一次
        assert_eq!(beeps, 10);
        assert_eq!(beep_offs, 1);
        assert!(!session.running());
    }

    #[test]
    fn topup_above_threshold_cancels_warning() {
        let mut now = Instant::now();
        let mut session = BaySession::new(Bay::Water);
        session.request_coin(now);
        session.coin_received(5, 11, 5, now);
        session.start();

        // 走到剩余 9 秒，提示音已激活
        for _ in 0..2 {
            now += Duration::from_secs(1);
            session.tick(now);
        }
        session.request_coin(now);
        now += COIN_REARM_WINDOW;
        let outcome = session.coin_received(5, 60, 5, now);
        assert!(outcome.commands.contains(&SerialCommand::BeepOff));

        now += Duration::from_secs(1);
        let outcome = session.tick(now);
        assert!(!outcome.commands.contains(&SerialCommand::BeepOn));
    }

    #[test]
    fn stop_mirrors_finish_and_is_idempotent() {
        let now = Instant::now();
        let mut session = BaySession::new(Bay::Water);
        session.request_coin(now);
        coin(&mut session, 5, now);
        session.start();

        let commands = session.stop().expect("stop running bay");
        assert!(commands.contains(&SerialCommand::RelayOff(Bay::Water)));
        assert!(session.is_idle());

        // 已空闲的停止是严格空操作，不重发断电命令
        assert!(session.stop().is_none());
    }

    #[test]
    fn stop_clears_unstarted_credit() {
        let now = Instant::now();
        let mut session = BaySession::new(Bay::Water);
        session.request_coin(now);
        coin(&mut session, 10, now);

        let commands = session.stop().expect("stop armed bay");
        assert!(commands.contains(&SerialCommand::DisableCoin));
        assert_eq!(session.credit(), 0);
        assert!(session.is_idle());
    }
}
