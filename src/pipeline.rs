use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::model::SessionIntent;
use crate::net::NetCommand;
use crate::processor::SessionProcessor;
use crate::serial::SerialCommand;

// 时间衰减的唯一节拍。
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// 会话调度的通道集合（意图入口、串口命令出口、网络命令出口）。
pub struct KioskChannels {
    pub intent_tx: Sender<SessionIntent>,
    pub intent_rx: Receiver<SessionIntent>,
    pub serial_cmd_tx: Sender<SerialCommand>,
    pub serial_cmd_rx: Receiver<SerialCommand>,
    pub net_cmd_tx: Sender<NetCommand>,
    pub net_cmd_rx: Receiver<NetCommand>,
}

impl KioskChannels {
    pub fn new() -> Self {
        let (intent_tx, intent_rx) = mpsc::channel();
        let (serial_cmd_tx, serial_cmd_rx) = mpsc::channel();
        let (net_cmd_tx, net_cmd_rx) = mpsc::channel();
        Self {
            intent_tx,
            intent_rx,
            serial_cmd_tx,
            serial_cmd_rx,
            net_cmd_tx,
            net_cmd_rx,
        }
    }
}

/// 启动会话调度线程：单线程消费全部意图并驱动 1 Hz 心跳。
/// 所有车道状态的修改只发生在这个线程上，因此无需加锁。
pub fn spawn_session_loop(
    mut processor: SessionProcessor,
    intent_rx: Receiver<SessionIntent>,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut next_tick = Instant::now() + TICK_INTERVAL;
        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let now = Instant::now();
            let timeout = next_tick.saturating_duration_since(now);
            match intent_rx.recv_timeout(timeout) {
                Ok(intent) => {
                    processor.handle_intent(intent, Instant::now());
                }
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    processor.tick(now);
                    next_tick += TICK_INTERVAL;
                    // 长时间停顿后不补发积压的心跳
                    if next_tick <= now {
                        next_tick = now + TICK_INTERVAL;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("Session loop stopped");
    })
}
