use crate::model::Bay;

/// 无法解析投币金额时的兜底币值（最小币单位，宁可多记给顾客）。
pub const DEFAULT_COIN_VALUE: u32 = 5;

/// 下发给继电器控制板的命令。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerialCommand {
    RelayOn(Bay),
    RelayOff(Bay),
    EnableCoin,
    DisableCoin,
    BeepOn,
    BeepOff,
}

impl SerialCommand {
    /// 编码为协议行（不含换行符）。
    pub fn to_line(&self) -> String {
        match self {
            SerialCommand::RelayOn(bay) => format!("RELAY_ON:{}", bay.lane_key()),
            SerialCommand::RelayOff(bay) => format!("RELAY_OFF:{}", bay.lane_key()),
            SerialCommand::EnableCoin => "ENABLE_COIN".to_string(),
            SerialCommand::DisableCoin => "DISABLE_COIN".to_string(),
            SerialCommand::BeepOn => "BEEP_ON".to_string(),
            SerialCommand::BeepOff => "BEEP_OFF".to_string(),
        }
    }
}

/// 控制板上报的事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SerialEvent {
    /// 投币，金额为最小币单位。
    Coin { amount: u32 },
    /// 心跳确认，仅表示链路存活。
    Ack,
}

/// 解析一条入站协议行。无法识别的行返回 None，不会使链路失败。
pub fn parse_line(line: &str) -> Option<SerialEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with("ACK") {
        return Some(SerialEvent::Ack);
    }

    let mut parts = line.splitn(2, ':');
    match parts.next() {
        Some("COIN") => {
            // 金额缺失或无法解析时按最小币值计
            let amount = parts
                .next()
                .and_then(|raw| raw.trim().parse::<u32>().ok())
                .filter(|amount| *amount > 0)
                .unwrap_or(DEFAULT_COIN_VALUE);
            Some(SerialEvent::Coin { amount })
        }
        _ => None,
    }
}
