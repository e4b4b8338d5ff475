use std::fs;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serialport::SerialPort;

use crate::model::{LinkStatus, SessionIntent};
use crate::serial::SerialCommand;
use crate::serial_io::{push_bytes_to_channel, LineReader};

pub const BAUD_RATE: u32 = 9600;
// 读循环的输入可用性轮询间隔，限制 CPU 占用。
const READ_POLL: Duration = Duration::from_millis(50);
// 掉线后的固定重连间隔；控制板总会回来，无需退避上限。
const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

type WriterSlot = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// 自动探测继电器控制板的串口设备。
/// 优先 USB 转串口，其次 ACM，找不到时用默认路径等它出现。
pub fn detect_serial_port() -> String {
    for prefix in ["ttyUSB", "ttyACM"] {
        let mut candidates: Vec<String> = fs::read_dir("/dev")
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .filter(|name| name.starts_with(prefix))
                    .collect()
            })
            .unwrap_or_default();
        candidates.sort();
        if let Some(name) = candidates.first() {
            return format!("/dev/{}", name);
        }
    }
    "/dev/ttyUSB0".to_string()
}

/// 启动串口读/写线程对。
/// 读线程兼任监督者：连接、轮询读取、掉线后按固定间隔重连；
/// 写线程消费命令通道，链路断开时命令直接丢弃（不排队不重发）。
/// 串口句柄只在这两个线程内存在。
pub fn spawn_link_tasks(
    port_path: String,
    intent_tx: Sender<SessionIntent>,
    command_rx: Receiver<SerialCommand>,
    shutdown: Arc<AtomicBool>,
) -> (thread::JoinHandle<()>, thread::JoinHandle<()>) {
    let writer_slot: WriterSlot = Arc::new(Mutex::new(None));

    let rx_handle = {
        let writer_slot = writer_slot.clone();
        let shutdown = shutdown.clone();
        thread::spawn(move || {
            read_supervisor_loop(&port_path, &intent_tx, &writer_slot, &shutdown);
            // 退出前释放写句柄，随后读句柄随作用域关闭
            if let Ok(mut slot) = writer_slot.lock() {
                *slot = None;
            }
            log::info!("Serial read loop stopped");
        })
    };

    let tx_handle = thread::spawn(move || {
        writer_loop(&command_rx, &writer_slot, &shutdown);
    });

    (rx_handle, tx_handle)
}

fn read_supervisor_loop(
    port_path: &str,
    intent_tx: &Sender<SessionIntent>,
    writer_slot: &WriterSlot,
    shutdown: &AtomicBool,
) {
    let mut reader = LineReader::new();
    while !shutdown.load(Ordering::SeqCst) {
        let _ = intent_tx.send(SessionIntent::Link(LinkStatus::Connecting));
        match serialport::new(port_path, BAUD_RATE)
            .timeout(READ_POLL)
            .open()
        {
            Ok(mut port) => {
                match port.try_clone() {
                    Ok(clone) => {
                        if let Ok(mut slot) = writer_slot.lock() {
                            *slot = Some(clone);
                        }
                    }
                    Err(err) => {
                        log::warn!("Serial write handle unavailable: {}", err);
                    }
                }
                log::info!("Relay controller connected on {}", port_path);
                let _ = intent_tx.send(SessionIntent::Link(LinkStatus::Connected));
                // 重连后丢弃上一次连接残留的半行
                reader.reset();

                let mut buf = [0u8; 256];
                loop {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    match port.read(&mut buf) {
                        Ok(0) => {}
                        Ok(count) => {
                            push_bytes_to_channel(&mut reader, &buf[..count], intent_tx)
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(err) => {
                            log::warn!("Serial read error: {}", err);
                            break;
                        }
                    }
                }

                // 任一读写失败都把链路降级为断开；会话状态不受影响
                if let Ok(mut slot) = writer_slot.lock() {
                    *slot = None;
                }
                let _ = intent_tx.send(SessionIntent::Link(LinkStatus::Disconnected));
                if !shutdown.load(Ordering::SeqCst) {
                    log::warn!("Relay controller disconnected, reconnecting...");
                }
            }
            Err(err) => {
                log::warn!("Serial connection failed on {}: {}", port_path, err);
                let _ = intent_tx.send(SessionIntent::Link(LinkStatus::Disconnected));
            }
        }

        sleep_until_retry(shutdown);
    }
}

fn writer_loop(
    command_rx: &Receiver<SerialCommand>,
    writer_slot: &WriterSlot,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match command_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(command) => send_command(command, writer_slot),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn send_command(command: SerialCommand, writer_slot: &WriterSlot) {
    let line = command.to_line();
    let Ok(mut slot) = writer_slot.lock() else {
        return;
    };
    match slot.as_mut() {
        Some(port) => {
            let framed = format!("{}\n", line);
            if let Err(err) = port.write_all(framed.as_bytes()) {
                log::warn!("Serial write error, dropping command '{}': {}", line, err);
                // 命令不排队不重发；读循环会发现掉线并重连
                *slot = None;
            } else {
                let _ = port.flush();
                log::debug!("Serial TX: {}", line);
            }
        }
        None => {
            log::warn!("Serial command dropped, link down: {}", line);
        }
    }
}

/// 固定间隔重连等待，按小步睡眠以便及时响应退出信号。
fn sleep_until_retry(shutdown: &AtomicBool) {
    let deadline = Instant::now() + RECONNECT_INTERVAL;
    while Instant::now() < deadline {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep(READ_POLL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_falls_back_to_default_path() {
        // 测试环境一般没有 USB 串口设备；无论有没有，
        // 结果都必须是 /dev 下的绝对路径
        let port = detect_serial_port();
        assert!(port.starts_with("/dev/tty"));
    }
}
