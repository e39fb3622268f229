//! Relay wire format.
//!
//! ```text
//! client → relay   text    "SYNC:<lastID>"            (first frame only)
//! client → relay   binary  <ciphertext>               (live send)
//! relay  → client  binary  [u32 BE id][ciphertext]    (backfill + broadcast)
//! ```

/// Prefix of the sync command.
pub const SYNC_PREFIX: &str = "SYNC:";

/// Size of the id header on relay → client frames.
pub const FRAME_HEADER_LEN: usize = 4;

/// The `SYNC:<lastID>` command a client sends as its first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncRequest {
    /// Highest id the client already holds (0 = none)
    pub last_id: u32,
}

impl SyncRequest {
    /// Create a sync request.
    pub fn new(last_id: u32) -> Self {
        Self { last_id }
    }

    /// Parse a sync command leniently.
    ///
    /// Anything that is not `SYNC:` followed by a decimal u32 yields `last_id = 0`,
    /// which means "send me everything". Leading digits are accepted the way a
    /// scanf-style reader would (`SYNC:12abc` → 12).
    pub fn parse(raw: &str) -> Self {
        let last_id = raw
            .trim()
            .strip_prefix(SYNC_PREFIX)
            .map(|rest| {
                let digits: String = rest
                    .trim_start()
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                digits.parse::<u32>().unwrap_or(0)
            })
            .unwrap_or(0);
        Self { last_id }
    }

    /// Whether `raw` is a well-formed sync command.
    pub fn is_well_formed(raw: &str) -> bool {
        raw.trim()
            .strip_prefix(SYNC_PREFIX)
            .is_some_and(|rest| rest.parse::<u32>().is_ok())
    }

    /// Render as the text frame body.
    pub fn to_command(&self) -> String {
        format!("{}{}", SYNC_PREFIX, self.last_id)
    }
}

/// Build a relay → client frame.
pub fn encode_frame(id: u32, ciphertext: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + ciphertext.len());
    frame.extend_from_slice(&id.to_be_bytes());
    frame.extend_from_slice(ciphertext);
    frame
}

/// Split a relay → client frame into `(id, ciphertext)`.
///
/// Frames of 4 bytes or fewer carry no payload and yield `None`.
pub fn decode_frame(frame: &[u8]) -> Option<(u32, &[u8])> {
    if frame.len() <= FRAME_HEADER_LEN {
        return None;
    }
    let (header, payload) = frame.split_at(FRAME_HEADER_LEN);
    let id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    Some((id, payload))
}
