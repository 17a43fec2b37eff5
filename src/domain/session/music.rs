//! Session Context - 音乐队列
//!
//! 不变量:
//! - 曲目按队列顺序播放，循环模式只做顺序改写不做乱序
//! - `loop_mode == Track` 时 advance 永不移除 `current`
//! - `loop_mode == Queue` 时播完的曲目回到 `pending` 尾部，其余曲目相对顺序不变
//! - `clear` 只清空 `pending`，不打断 `current`
//! - 连续打开失败达到上限后硬停，避免坏队列上的无限自动跳过

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// 曲目来源目录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Primary,
    Secondary,
    Tertiary,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Primary => write!(f, "primary"),
            SourceKind::Secondary => write!(f, "secondary"),
            SourceKind::Tertiary => write!(f, "tertiary"),
        }
    }
}

/// 一首已解析的曲目
///
/// 由外部解析协作者产出，入队后所有权转移给音乐队列，不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub source_uri: String,
    pub duration_display: Option<String>,
    pub thumbnail: Option<String>,
    pub source_kind: SourceKind,
    pub requested_by: Option<String>,
}

/// 循环模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl LoopMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopMode::Off => "off",
            LoopMode::Track => "track",
            LoopMode::Queue => "queue",
        }
    }
}

impl std::str::FromStr for LoopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(LoopMode::Off),
            "track" => Ok(LoopMode::Track),
            "queue" => Ok(LoopMode::Queue),
            other => Err(format!("unknown loop mode: {}", other)),
        }
    }
}

/// advance 状态转移的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// 播放这首曲目（已写入 `current`）
    Play(Track),
    /// 队列耗尽，停止播放并通知「队列播完」
    Finished,
}

/// 音乐队列的只读快照（供展示层使用）
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub pending: Vec<Track>,
    pub loop_mode: LoopMode,
    pub volume_percent: u8,
    pub playing: bool,
    pub paused: bool,
}

/// 音乐队列状态
#[derive(Debug)]
pub struct MusicQueueState {
    pending: VecDeque<Track>,
    current: Option<Track>,
    loop_mode: LoopMode,
    volume_percent: u8,
    playing: bool,
    paused: bool,
    /// 连续打开失败计数，成功播完一首后清零
    consecutive_failures: u32,
}

impl MusicQueueState {
    pub fn new(default_volume: u8) -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            loop_mode: LoopMode::Off,
            volume_percent: default_volume,
            playing: false,
            paused: false,
            consecutive_failures: 0,
        }
    }

    /// 追加曲目到队列尾部，返回追加数量
    pub fn enqueue(&mut self, tracks: Vec<Track>) -> usize {
        let count = tracks.len();
        self.pending.extend(tracks);
        count
    }

    /// 推进到下一首
    ///
    /// 1. `Track` 循环且 `current` 存在 → 原样重播
    /// 2. `pending` 非空 → `Queue` 循环时先把 `current` 放回尾部，再出队新头
    /// 3. 否则队列耗尽 → 清空 `current`，标记未在播
    pub fn advance(&mut self) -> Advance {
        let next = if self.loop_mode == LoopMode::Track && self.current.is_some() {
            self.current.clone()
        } else if !self.pending.is_empty() {
            if self.loop_mode == LoopMode::Queue {
                if let Some(finished) = self.current.take() {
                    self.pending.push_back(finished);
                }
            }
            let head = self.pending.pop_front();
            self.current = head.clone();
            head
        } else {
            None
        };

        match next {
            Some(track) => {
                self.playing = true;
                self.paused = false;
                Advance::Play(track)
            }
            None => {
                self.current = None;
                self.playing = false;
                self.paused = false;
                Advance::Finished
            }
        }
    }

    /// 清空待播队列，不打断当前曲目
    pub fn clear_pending(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    /// 当前曲目正常终结（Idle 或播放器错误，二者同样处理）
    pub fn finish_current(&mut self) {
        self.playing = false;
        self.paused = false;
        self.consecutive_failures = 0;
    }

    /// 当前曲目打开失败，丢弃并计数
    ///
    /// 返回 true 表示连续失败已达上限，调用方应硬停
    pub fn fail_current(&mut self, max_consecutive: u32) -> bool {
        self.current = None;
        self.playing = false;
        self.consecutive_failures += 1;
        self.consecutive_failures >= max_consecutive
    }

    /// 硬停后复位（队列保留，等待新的 play 触发）
    pub fn halt(&mut self) {
        self.current = None;
        self.playing = false;
        self.paused = false;
        self.consecutive_failures = 0;
    }

    pub fn set_loop(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    /// 音量百分比，钳制在 0..=200
    pub fn set_volume(&mut self, percent: u8) {
        self.volume_percent = percent.min(200);
    }

    pub fn volume_percent(&self) -> u8 {
        self.volume_percent
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            pending: self.pending.iter().cloned().collect(),
            loop_mode: self.loop_mode,
            volume_percent: self.volume_percent,
            playing: self.playing,
            paused: self.paused,
        }
    }
}
