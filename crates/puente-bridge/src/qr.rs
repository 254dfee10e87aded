// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer-side QR rendering with the ESC/POS two-dimensional code commands
// (GS ( k, symbol type 49).
//
// The printer rasterises the symbol itself, so no bitmap is built here.

use puente_core::error::EncodingError;

use crate::traits::QrRenderer;

/// Largest data block a single GS ( k store command can carry.
const MAX_STORE_LEN: usize = 7089;

/// QR error correction level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QrErrorCorrection {
    #[default]
    Low,
    Medium,
    Quartile,
    High,
}

impl QrErrorCorrection {
    fn code(self) -> u8 {
        match self {
            Self::Low => 0x30,
            Self::Medium => 0x31,
            Self::Quartile => 0x32,
            Self::High => 0x33,
        }
    }
}

/// Renders QR codes as native ESC/POS commands (model 2).
#[derive(Debug, Clone, Default)]
pub struct EscPosQrRenderer {
    error_correction: QrErrorCorrection,
}

impl EscPosQrRenderer {
    pub fn new(error_correction: QrErrorCorrection) -> Self {
        Self { error_correction }
    }
}

impl QrRenderer for EscPosQrRenderer {
    fn render_qr(&self, payload: &str, module_size: u8) -> Result<Vec<u8>, EncodingError> {
        let data = payload.as_bytes();
        if data.len() > MAX_STORE_LEN {
            return Err(EncodingError::QrTooLarge {
                len: data.len(),
                max: MAX_STORE_LEN,
            });
        }

        let mut buf = Vec::with_capacity(data.len() + 32);

        // Function 165: select model 2.
        buf.extend_from_slice(&[0x1D, 0x28, 0x6B, 0x04, 0x00, 0x31, 0x41, 0x32, 0x00]);

        // Function 167: module size in dots.
        buf.extend_from_slice(&[0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x43, module_size]);

        // Function 169: error correction level.
        buf.extend_from_slice(&[
            0x1D,
            0x28,
            0x6B,
            0x03,
            0x00,
            0x31,
            0x45,
            self.error_correction.code(),
        ]);

        // Function 180: store the data in the symbol storage area.
        let len = data.len() + 3;
        buf.extend_from_slice(&[
            0x1D,
            0x28,
            0x6B,
            (len & 0xFF) as u8,
            ((len >> 8) & 0xFF) as u8,
            0x31,
            0x50,
            0x30,
        ]);
        buf.extend_from_slice(data);

        // Function 181: print the stored symbol.
        buf.extend_from_slice(&[0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x51, 0x30]);

        Ok(buf)
    }
}
