//! Connection Supervisor - 连接生命周期监督
//!
//! 持有连接建立与断线恢复的状态机:
//! - connect: 拨号后限时等待 Ready（默认 10s），超时拆除本次尝试并返回 JoinFailed
//! - watchdog: 检测到非自愿断线后，限时等待恢复信号（Signalling/Connecting，
//!   默认 5s）；恢复则会话状态不受影响；超时则向会话发送终结事件，
//!   所有队列与录音随会话一并拆除（不支持断线续播，刻意简化）

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::actor::SessionEvent;
use crate::application::ports::{ConnectionHandle, TransportPort};
use crate::domain::session::{ChannelRef, ConnectionState, Credentials, GroupId, VoiceError};

/// 等待连接进入满足条件的状态；观察端关闭时返回 false
async fn wait_for_state(
    states: &mut watch::Receiver<ConnectionState>,
    predicate: impl Fn(ConnectionState) -> bool,
) -> bool {
    loop {
        if predicate(*states.borrow_and_update()) {
            return true;
        }
        if states.changed().await.is_err() {
            return false;
        }
    }
}

/// 建立到语音频道的连接，限时等待握手完成
pub async fn connect(
    transport: &dyn TransportPort,
    group: &GroupId,
    channel: &ChannelRef,
    credentials: &Credentials,
    ready_timeout: Duration,
) -> Result<Arc<dyn ConnectionHandle>, VoiceError> {
    let handle = transport
        .join(channel, credentials)
        .await
        .map_err(|e| VoiceError::JoinFailed(e.to_string()))?;

    let mut states = handle.state_watch();
    let ready = tokio::time::timeout(
        ready_timeout,
        wait_for_state(&mut states, |s| s == ConnectionState::Ready),
    )
    .await;

    match ready {
        Ok(true) => {
            tracing::info!(group = %group, channel = %channel, "Voice connection ready");
            Ok(handle)
        }
        _ => {
            // 握手超时或观察端关闭：拆除本次尝试
            handle.leave().await;
            tracing::warn!(group = %group, channel = %channel, "Voice handshake timed out");
            Err(VoiceError::JoinFailed(format!(
                "handshake not ready within {:?}",
                ready_timeout
            )))
        }
    }
}

/// 启动断线恢复 watchdog
///
/// 恢复信号在限时内到达 → 继续监督，会话状态不变；
/// 超时 → 发送 `ConnectionTerminal`，由会话 actor 负责整体拆除
pub fn spawn_watchdog(
    group: GroupId,
    handle: Arc<dyn ConnectionHandle>,
    recover_timeout: Duration,
    events: mpsc::Sender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut states = handle.state_watch();
        loop {
            if states.changed().await.is_err() {
                break;
            }
            let state = *states.borrow_and_update();
            if state != ConnectionState::Disconnected {
                continue;
            }

            tracing::warn!(group = %group, "Voice link dropped, waiting for recovery");
            let recovered = tokio::time::timeout(
                recover_timeout,
                wait_for_state(&mut states, |s| {
                    s.is_recovering() || s == ConnectionState::Ready
                }),
            )
            .await;

            match recovered {
                Ok(true) => {
                    tracing::info!(group = %group, "Voice link recovering, session state kept");
                }
                _ => {
                    tracing::warn!(group = %group, "Voice link unrecoverable, session will be torn down");
                    let _ = events.send(SessionEvent::ConnectionTerminal).await;
                    break;
                }
            }
        }
    })
}
