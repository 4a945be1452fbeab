//! JEDEC fuse files for MachXO2 parts.
//!
//! A JEDEC file is a run of `*`-terminated fields between STX (`0x02`) and ETX
//! (`0x03`). Only three kinds matter here: `NOTE` fields, which tell the
//! fuse blocks that follow them apart; `L` fields, which hold 128-bit flash
//! rows; and the `E` field, which carries the feature row and feature bits.
//! Fuse strings list bit 0 first.

use log::debug;

use crate::error::JedecError;

pub const ROW_BITS: usize = 128;

/// One 128-bit flash row, LSB-first.
pub type FuseRow = [u8; ROW_BITS / 8];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JedecFile {
    /// Configuration rows.
    pub cfg_data: Vec<FuseRow>,
    /// Embedded block RAM initialisation rows, programmed after `cfg_data`.
    pub ebr_data: Vec<FuseRow>,
    /// User flash rows.
    pub ufm_data: Vec<FuseRow>,
    pub feature_row: u64,
    pub feature_bits: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Config,
    Ebr,
    Ufm,
    Ignored,
}

impl Block {
    fn after_note(note: &str) -> Self {
        if note.contains("EBR_INIT DATA") {
            Block::Ebr
        } else if note.contains("END CONFIG DATA") {
            Block::Ignored
        } else if note.contains("TAG DATA") {
            Block::Ufm
        } else {
            Block::Config
        }
    }
}

impl JedecFile {
    pub fn parse(text: &str) -> Result<Self, JedecError> {
        let body = match text.find('\x02') {
            Some(start) => &text[start + 1..],
            None => text,
        };
        let body = match body.find('\x03') {
            Some(end) => &body[..end],
            None => body,
        };

        let mut jed = JedecFile::default();
        let mut block = Block::Config;
        let mut features = None;

        for field in body.split('*').map(str::trim).filter(|f| !f.is_empty()) {
            if let Some(note) = field.strip_prefix("NOTE") {
                block = Block::after_note(note.trim());
            } else if field.starts_with('L') {
                let rows = field
                    .split_whitespace()
                    .skip(1)
                    .map(parse_row)
                    .collect::<Result<Vec<_>, _>>()?;
                match block {
                    Block::Config => jed.cfg_data.extend(rows),
                    Block::Ebr => jed.ebr_data.extend(rows),
                    Block::Ufm => jed.ufm_data.extend(rows),
                    Block::Ignored => {}
                }
            } else if let Some(rest) = field.strip_prefix('E') {
                let mut parts = rest.split_whitespace();
                let (Some(row), Some(bits)) = (parts.next(), parts.next()) else {
                    return Err(JedecError::MalformedFeatureRow);
                };
                features = Some((parse_fuses::<u64>(row, 64)?, parse_fuses::<u16>(bits, 16)?));
            }
        }

        if jed.cfg_data.is_empty() {
            return Err(JedecError::MissingConfigData);
        }
        (jed.feature_row, jed.feature_bits) = features.ok_or(JedecError::MissingFeatureRow)?;

        debug!(
            "jedec: {} config, {} ebr, {} ufm rows",
            jed.cfg_data.len(),
            jed.ebr_data.len(),
            jed.ufm_data.len()
        );
        Ok(jed)
    }

    /// Rows written to flash, which is also how many get read back.
    pub fn num_rows(&self) -> usize {
        self.cfg_data.len() + self.ebr_data.len() + self.ufm_data.len()
    }
}

fn parse_row(fuses: &str) -> Result<FuseRow, JedecError> {
    if fuses.len() != ROW_BITS {
        return Err(JedecError::RowWidth {
            expected: ROW_BITS,
            actual: fuses.len(),
        });
    }
    let mut row = [0; ROW_BITS / 8];
    for (i, fuse) in fuses.chars().enumerate() {
        if fuse_bit(fuse)? {
            row[i / 8] |= 1 << (i % 8);
        }
    }
    Ok(row)
}

fn parse_fuses<T>(fuses: &str, width: usize) -> Result<T, JedecError>
where
    T: From<u8> + core::ops::Shl<usize, Output = T> + core::ops::BitOr<Output = T>,
{
    if fuses.len() != width {
        return Err(JedecError::RowWidth {
            expected: width,
            actual: fuses.len(),
        });
    }
    fuses.chars().enumerate().try_fold(T::from(0), |acc, (i, fuse)| {
        Ok(acc | (T::from(u8::from(fuse_bit(fuse)?)) << i))
    })
}

fn fuse_bit(fuse: char) -> Result<bool, JedecError> {
    match fuse {
        '0' => Ok(false),
        '1' => Ok(true),
        other => Err(JedecError::InvalidFuse(other)),
    }
}
