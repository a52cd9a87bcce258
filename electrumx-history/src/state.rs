//! The `b'\0state'` record: an ASCII-printable `{key: value}` blob, matching
//! the original's `repr(dict)` / `ast.literal_eval(...)` round-trip without
//! pulling in a Python-expression parser for three integer fields.

use crate::error::HistoryError;

pub const CURRENT_DB_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    pub hist_db_tx_count: u64,
    pub db_version: u32,
    pub upgrade_cursor: i64,
}

impl Default for State {
    fn default() -> Self {
        State {
            hist_db_tx_count: 0,
            db_version: CURRENT_DB_VERSION,
            upgrade_cursor: -1,
        }
    }
}

impl State {
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{{'hist_db_tx_count': {}, 'db_version': {}, 'upgrade_cursor': {}}}",
            self.hist_db_tx_count, self.db_version, self.upgrade_cursor
        )
        .into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HistoryError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| HistoryError::BadState("not valid UTF-8".into()))?;
        let trimmed = text.trim().trim_start_matches('{').trim_end_matches('}');

        let mut state = State {
            hist_db_tx_count: 0,
            db_version: 0,
            upgrade_cursor: -1,
        };
        for field in trimmed.split(',') {
            let mut parts = field.splitn(2, ':');
            let key = parts
                .next()
                .ok_or_else(|| HistoryError::BadState(field.to_string()))?
                .trim()
                .trim_matches('\'')
                .trim_matches('"');
            let value = parts
                .next()
                .ok_or_else(|| HistoryError::BadState(field.to_string()))?
                .trim();
            match key {
                "hist_db_tx_count" => {
                    state.hist_db_tx_count = value
                        .parse()
                        .map_err(|_| HistoryError::BadState(field.to_string()))?
                }
                "db_version" => {
                    state.db_version = value
                        .parse()
                        .map_err(|_| HistoryError::BadState(field.to_string()))?
                }
                "upgrade_cursor" => {
                    state.upgrade_cursor = value
                        .parse()
                        .map_err(|_| HistoryError::BadState(field.to_string()))?
                }
                _ => {}
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrips_through_its_ascii_encoding() {
        let s = State {
            hist_db_tx_count: 123_456,
            db_version: 3,
            upgrade_cursor: -1,
        };
        let decoded = State::decode(&s.encode()).unwrap();
        assert_eq!(s, decoded);
    }
}
