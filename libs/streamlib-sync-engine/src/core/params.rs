// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Parameters the host sets on the synchronizer and the renderer
//!
//! Payloads arrive as little-endian `u32` words. Decoding is separate from
//! applying, so a short or malformed payload is rejected before any state
//! changes.

use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamId {
    VoiceProcInfo,
    ContainerFrameDuration,
    FirstProcTick,
    ProcessNotification,
    PortWillStart,
    Resync,
    DataDropDuringSync,
}

impl std::fmt::Display for ParamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Timing of the voice processing cycle relative to the periodic tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VoiceProcInfo {
    /// Where processing starts inside the cycle, after the tick.
    pub start_offset_us: u32,
    /// Data buffered before the first frame of a cycle is released.
    pub start_samples_us: u32,
    /// 20 or 40.
    pub cycle_duration_ms: u32,
    pub path_delay_us: u32,
    /// False detaches from the periodic tick.
    pub is_subscribe: bool,
}

impl VoiceProcInfo {
    pub const WIRE_SIZE: usize = 20;

    pub fn cycle_duration_us(&self) -> i64 {
        i64::from(self.cycle_duration_ms) * 1_000
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        [
            self.start_offset_us,
            self.start_samples_us,
            self.cycle_duration_ms,
            self.path_delay_us,
            u32::from(self.is_subscribe),
        ]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Param {
    VoiceProcInfo(VoiceProcInfo),
    /// Aggregated processing frame of the container, in microseconds.
    ContainerFrameDuration { duration_us: u32 },
    /// The first periodic tick has fired.
    FirstProcTick,
    /// The host is about to call `process()` for this tick.
    ProcessNotification,
    /// A port is about to start flowing.
    PortWillStart,
    Resync,
    DataDropDuringSync,
}

impl Param {
    pub fn id(&self) -> ParamId {
        match self {
            Param::VoiceProcInfo(_) => ParamId::VoiceProcInfo,
            Param::ContainerFrameDuration { .. } => ParamId::ContainerFrameDuration,
            Param::FirstProcTick => ParamId::FirstProcTick,
            Param::ProcessNotification => ParamId::ProcessNotification,
            Param::PortWillStart => ParamId::PortWillStart,
            Param::Resync => ParamId::Resync,
            Param::DataDropDuringSync => ParamId::DataDropDuringSync,
        }
    }

    /// Parse a raw payload for `id`.
    ///
    /// Voice proc info must be exactly its wire size. Frame duration needs at
    /// least one word. Notifications ignore their payload.
    pub fn decode(id: ParamId, payload: &[u8]) -> Result<Self> {
        match id {
            ParamId::VoiceProcInfo => {
                if payload.len() != VoiceProcInfo::WIRE_SIZE {
                    return Err(need_more(id, VoiceProcInfo::WIRE_SIZE, payload.len()));
                }
                let info = VoiceProcInfo {
                    start_offset_us: word(payload, 0),
                    start_samples_us: word(payload, 1),
                    cycle_duration_ms: word(payload, 2),
                    path_delay_us: word(payload, 3),
                    is_subscribe: word(payload, 4) != 0,
                };
                if info.is_subscribe && !matches!(info.cycle_duration_ms, 20 | 40) {
                    return Err(EngineError::BadParam {
                        id: id.to_string(),
                        reason: format!("cycle duration {}ms is not 20 or 40", info.cycle_duration_ms),
                    });
                }
                Ok(Param::VoiceProcInfo(info))
            }
            ParamId::ContainerFrameDuration => {
                if payload.len() < 4 {
                    return Err(need_more(id, 4, payload.len()));
                }
                Ok(Param::ContainerFrameDuration {
                    duration_us: word(payload, 0),
                })
            }
            ParamId::FirstProcTick => Ok(Param::FirstProcTick),
            ParamId::ProcessNotification => Ok(Param::ProcessNotification),
            ParamId::PortWillStart => Ok(Param::PortWillStart),
            ParamId::Resync => Ok(Param::Resync),
            ParamId::DataDropDuringSync => Ok(Param::DataDropDuringSync),
        }
    }
}

fn word(payload: &[u8], index: usize) -> u32 {
    let start = index * 4;
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&payload[start..start + 4]);
    u32::from_le_bytes(bytes)
}

fn need_more(id: ParamId, expected: usize, got: usize) -> EngineError {
    tracing::error!("[Param] {} bad payload size {} (expected {})", id, got, expected);
    EngineError::NeedMore(format!("{id} payload is {got} bytes, expected {expected}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_voice_proc_info() {
        let info = VoiceProcInfo {
            start_offset_us: 1_000,
            start_samples_us: 20_000,
            cycle_duration_ms: 20,
            path_delay_us: 500,
            is_subscribe: true,
        };
        let decoded = Param::decode(ParamId::VoiceProcInfo, &info.to_bytes()).unwrap();
        assert_eq!(decoded, Param::VoiceProcInfo(info));
        assert_eq!(info.cycle_duration_us(), 20_000);
    }

    #[test]
    fn test_voice_proc_info_size_must_match() {
        let err = Param::decode(ParamId::VoiceProcInfo, &[0u8; 16]).unwrap_err();
        assert!(err.is_retryable());
        assert!(Param::decode(ParamId::VoiceProcInfo, &[0u8; 24]).is_err());
    }

    #[test]
    fn test_voice_proc_info_rejects_odd_cycle() {
        let info = VoiceProcInfo {
            cycle_duration_ms: 30,
            is_subscribe: true,
            ..Default::default()
        };
        assert!(matches!(
            Param::decode(ParamId::VoiceProcInfo, &info.to_bytes()),
            Err(EngineError::BadParam { .. })
        ));
    }

    #[test]
    fn test_frame_duration() {
        let payload = 10_000u32.to_le_bytes();
        assert_eq!(
            Param::decode(ParamId::ContainerFrameDuration, &payload).unwrap(),
            Param::ContainerFrameDuration { duration_us: 10_000 }
        );
        assert!(Param::decode(ParamId::ContainerFrameDuration, &payload[..2]).is_err());
    }

    #[test]
    fn test_notifications_ignore_payload() {
        assert_eq!(
            Param::decode(ParamId::Resync, &[]).unwrap().id(),
            ParamId::Resync
        );
    }
}
