use std::sync::mpsc::Sender;

use crate::model::SessionIntent;
use crate::serial::{self, SerialEvent};

// 无换行符时允许累积的最大字节数，超过即丢弃缓冲。
const MAX_LINE_LEN: usize = 256;

/// 行读取器：把串口字节流组装成完整的协议行。
/// 重连后通过 reset 丢弃残留的半行。
pub struct LineReader {
    buffer: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_LINE_LEN),
        }
    }

    /// 推入一批字节，返回其中完成的行（已去除行尾控制符）。
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.buffer).trim().to_string();
                self.buffer.clear();
                if !line.is_empty() {
                    lines.push(line);
                }
                continue;
            }
            if self.buffer.len() >= MAX_LINE_LEN {
                // 控制板不会发出这么长的行，说明是噪声
                self.buffer.clear();
            }
            self.buffer.push(byte);
        }
        lines
    }

    /// 丢弃未完成的行。
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// 把一批串口字节解析成事件并投递到会话调度通道。
pub fn push_bytes_to_channel(
    reader: &mut LineReader,
    bytes: &[u8],
    intent_tx: &Sender<SessionIntent>,
) {
    for line in reader.push_bytes(bytes) {
        match serial::parse_line(&line) {
            Some(SerialEvent::Coin { amount }) => {
                let _ = intent_tx.send(SessionIntent::Coin { amount });
            }
            Some(SerialEvent::Ack) => {}
            None => {
                log::debug!("Unrecognized serial line ignored: {:?}", line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn reassembles_lines_across_partial_reads() {
        let mut reader = LineReader::new();
        assert!(reader.push_bytes(b"COI").is_empty());
        assert!(reader.push_bytes(b"N:5").is_empty());
        assert_eq!(reader.push_bytes(b"\nACK\n"), vec!["COIN:5", "ACK"]);
    }

    #[test]
    fn strips_carriage_returns_and_skips_blank_lines() {
        let mut reader = LineReader::new();
        assert_eq!(reader.push_bytes(b"COIN:5\r\n\r\n"), vec!["COIN:5"]);
    }

    #[test]
    fn reset_discards_partial_line() {
        let mut reader = LineReader::new();
        assert!(reader.push_bytes(b"COIN:1").is_empty());
        reader.reset();
        assert_eq!(reader.push_bytes(b"0\n"), Vec::<String>::new());
    }

    #[test]
    fn oversized_noise_does_not_grow_buffer() {
        let mut reader = LineReader::new();
        let noise = vec![b'x'; 4 * MAX_LINE_LEN];
        assert!(reader.push_bytes(&noise).is_empty());
        // 换行符落地时残留的噪声最多只有一段截断缓冲
        let lines = reader.push_bytes(b"\nCOIN:5\n");
        assert_eq!(lines.last().map(String::as_str), Some("COIN:5"));
        assert!(lines.iter().all(|line| line.len() <= MAX_LINE_LEN));
    }

    #[test]
    fn forwards_coin_events_only() {
        let (tx, rx) = mpsc::channel();
        let mut reader = LineReader::new();
        push_bytes_to_channel(&mut reader, b"ACK\nCOIN:10\nJUNK\n", &tx);
        match rx.try_recv() {
            Ok(SessionIntent::Coin { amount }) => assert_eq!(amount, 10),
            other => panic!("unexpected intent: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
