//! Session Context - 播报队列
//!
//! 不变量:
//! - 播报任务严格按入队顺序播放（FIFO）
//! - 任务入队后不可变，播放结束（无论成败）即销毁，从不重试
//! - 同一群组同一时刻最多一个播报在播放（single-flight）

use std::collections::VecDeque;

use super::errors::VoiceError;

/// 播报文本长度上限（字符数）
pub const DEFAULT_TEXT_CAP: usize = 500;

/// 一条待播报的合成语音任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementJob {
    text: String,
    language: String,
    slow: bool,
}

impl AnnouncementJob {
    /// 创建播报任务
    ///
    /// 空文本在边界直接拒绝；超长文本截断到 `text_cap` 个字符
    pub fn new(
        text: impl Into<String>,
        language: impl Into<String>,
        slow: bool,
        text_cap: usize,
    ) -> Result<Self, VoiceError> {
        let text: String = text.into();
        if text.trim().is_empty() {
            return Err(VoiceError::EmptyText);
        }
        let text = text.chars().take(text_cap).collect();
        Ok(Self {
            text,
            language: language.into(),
            slow,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn slow(&self) -> bool {
        self.slow
    }
}

/// 播报队列状态
///
/// `playing` 是 single-flight 标志：置位期间 drain 不会弹出新任务，
/// 当前任务终结后由事件驱动清除并继续
#[derive(Debug, Default)]
pub struct AnnouncementQueue {
    jobs: VecDeque<AnnouncementJob>,
    playing: bool,
}

impl AnnouncementQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: AnnouncementJob) {
        self.jobs.push_back(job);
    }

    /// 取出下一个待播任务并置位 single-flight 标志
    ///
    /// 已有任务在播或队列为空时返回 None
    pub fn take_next(&mut self) -> Option<AnnouncementJob> {
        if self.playing {
            return None;
        }
        let job = self.jobs.pop_front()?;
        self.playing = true;
        Some(job)
    }

    /// 当前任务终结（Idle 或出错），清除 single-flight 标志
    pub fn finish_current(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_rejected() {
        assert!(matches!(
            AnnouncementJob::new("", "vi", false, DEFAULT_TEXT_CAP),
            Err(VoiceError::EmptyText)
        ));
        assert!(matches!(
            AnnouncementJob::new("   ", "vi", false, DEFAULT_TEXT_CAP),
            Err(VoiceError::EmptyText)
        ));
    }

    #[test]
    fn test_text_truncated_to_cap() {
        let long = "a".repeat(600);
        let job = AnnouncementJob::new(long, "en", false, DEFAULT_TEXT_CAP).unwrap();
        assert_eq!(job.text().chars().count(), 500);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = "你好".repeat(300);
        let job = AnnouncementJob::new(text, "zh", false, DEFAULT_TEXT_CAP).unwrap();
        assert_eq!(job.text().chars().count(), 500);
    }

    #[test]
    fn test_fifo_order_with_single_flight() {
        let mut queue = AnnouncementQueue::new();
        for text in ["one", "two", "three"] {
            queue.push(AnnouncementJob::new(text, "en", false, DEFAULT_TEXT_CAP).unwrap());
        }

        let first = queue.take_next().unwrap();
        assert_eq!(first.text(), "one");
        // 在播期间不会弹出新任务
        assert!(queue.take_next().is_none());

        queue.finish_current();
        assert_eq!(queue.take_next().unwrap().text(), "two");
        queue.finish_current();
        assert_eq!(queue.take_next().unwrap().text(), "three");
        queue.finish_current();
        assert!(queue.take_next().is_none());
    }
}
