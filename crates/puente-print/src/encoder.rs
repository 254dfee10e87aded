// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ESC/POS command encoder.
//
// Turns a `JobDescription` into one command frame per segment. Encoding is
// pure: no I/O, no shared mutable state, and identical input always yields
// identical bytes.

use std::sync::Arc;

use tracing::instrument;

use puente_bridge::{EscPosQrRenderer, QrRenderer};
use puente_core::config::EncoderConfig;
use puente_core::error::EncodingError;
use puente_core::types::{Alignment, Charset, DrawerPin, Emphasis, JobDescription, Segment};

use crate::raster::Raster;

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const FS: u8 = 0x1C;
const LF: u8 = 0x0A;

/// Supported QR module sizes in dots.
const QR_MODULE_RANGE: std::ops::RangeInclusive<u8> = 1..=16;

/// Device-native bytes for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame(Vec<u8>);

impl CommandFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Encodes job descriptions for one printer model.
#[derive(Clone)]
pub struct Encoder {
    config: EncoderConfig,
    qr: Arc<dyn QrRenderer>,
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Encoder {
    pub fn new(config: EncoderConfig, qr: Arc<dyn QrRenderer>) -> Self {
        Self { config, qr }
    }

    /// Encoder that lets the printer draw QR codes itself.
    pub fn with_native_qr(config: EncoderConfig) -> Self {
        Self::new(config, Arc::new(EscPosQrRenderer::default()))
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Render every segment into its command frame.
    ///
    /// The first frame also initialises the printer and selects the code
    /// page. When the job does not end with an explicit cut, the cut sequence
    /// is appended to the last frame.
    #[instrument(skip_all, fields(segments = description.segments().len()))]
    pub fn encode(&self, description: &JobDescription) -> Result<Vec<CommandFrame>, EncodingError> {
        let mut frames = Vec::with_capacity(description.segments().len());

        for segment in description.segments() {
            let mut buf = Vec::new();
            if frames.is_empty() {
                buf.extend_from_slice(&[ESC, b'@']);
                buf.extend_from_slice(self.code_page());
            }
            self.encode_segment(segment, &mut buf)?;
            frames.push(CommandFrame(buf));
        }

        if !description.ends_with_cut() {
            if let Some(last) = frames.last_mut() {
                last.0.extend_from_slice(&cut());
            }
        }

        Ok(frames)
    }

    /// Decode every image in `description` so unprintable pictures are
    /// refused before the job is queued.
    pub fn check_images(&self, description: &JobDescription) -> Result<(), EncodingError> {
        for segment in description.segments() {
            if let Segment::Image { data } = segment {
                Raster::from_base64(data, self.config.image_width)?;
            }
        }
        Ok(())
    }

    fn code_page(&self) -> &'static [u8] {
        match self.config.charset {
            // Leave Kanji mode, then select WPC1252.
            Charset::Windows1252 => &[FS, b'.', ESC, b't', 16],
            Charset::Gbk => &[FS, b'&'],
        }
    }

    fn encode_segment(&self, segment: &Segment, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match segment {
            Segment::Text {
                content,
                align,
                emphasis,
            } => {
                let text = encode_text(content, self.config.charset)?;
                buf.extend_from_slice(&[ESC, b'a', align_code(*align)]);
                let (bold, underline, double) = style_flags(*emphasis);
                if bold {
                    buf.extend_from_slice(&[ESC, b'E', 1]);
                }
                if underline {
                    buf.extend_from_slice(&[ESC, b'-', 1]);
                }
                if double {
                    buf.extend_from_slice(&[GS, b'!', 0x11]);
                }
                buf.extend_from_slice(&text);
                buf.push(LF);
                if double {
                    buf.extend_from_slice(&[GS, b'!', 0x00]);
                }
                if underline {
                    buf.extend_from_slice(&[ESC, b'-', 0]);
                }
                if bold {
                    buf.extend_from_slice(&[ESC, b'E', 0]);
                }
                if *align != Alignment::Left {
                    buf.extend_from_slice(&[ESC, b'a', 0]);
                }
            }
            Segment::Qr {
                payload,
                module_size,
            } => {
                if payload.len() > self.config.max_qr_payload {
                    return Err(EncodingError::QrTooLarge {
                        len: payload.len(),
                        max: self.config.max_qr_payload,
                    });
                }
                let size = (*module_size).clamp(*QR_MODULE_RANGE.start(), *QR_MODULE_RANGE.end());
                buf.extend_from_slice(&[ESC, b'a', 1]);
                buf.extend_from_slice(&self.qr.render_qr(payload, size)?);
                buf.push(LF);
                buf.extend_from_slice(&[ESC, b'a', 0]);
            }
            Segment::Cut => buf.extend_from_slice(&cut()),
            Segment::Feed { lines } => buf.extend_from_slice(&[ESC, b'd', *lines]),
            Segment::OpenDrawer { pin } => {
                let m = match pin {
                    DrawerPin::Pin2 => 0,
                    DrawerPin::Pin5 => 1,
                };
                // ESC p m t1 t2: 50 ms on, 500 ms off.
                buf.extend_from_slice(&[ESC, b'p', m, 25, 250]);
            }
            Segment::Image { data } => {
                let raster = Raster::from_base64(data, self.config.image_width)?;
                buf.extend_from_slice(&[ESC, b'a', 1]);
                raster.write_command(buf);
                buf.extend_from_slice(&[ESC, b'a', 0]);
            }
        }
        Ok(())
    }
}

/// GS V 66 0: feed to the cutter and partially cut.
fn cut() -> [u8; 4] {
    [GS, b'V', 66, 0]
}

fn align_code(align: Alignment) -> u8 {
    match align {
        Alignment::Left => 0,
        Alignment::Center => 1,
        Alignment::Right => 2,
    }
}

/// (bold, underline, double size)
fn style_flags(emphasis: Emphasis) -> (bool, bool, bool) {
    match emphasis {
        Emphasis::Normal => (false, false, false),
        Emphasis::Bold => (true, false, false),
        Emphasis::Underline => (false, true, false),
        Emphasis::DoubleSize => (false, false, true),
        Emphasis::BoldDoubleSize => (true, false, true),
    }
}

/// Encode text in the printer's character set, rejecting characters the code
/// page cannot represent.
fn encode_text(content: &str, charset: Charset) -> Result<Vec<u8>, EncodingError> {
    let encoding = match charset {
        Charset::Windows1252 => encoding_rs::WINDOWS_1252,
        Charset::Gbk => encoding_rs::GBK,
    };

    let (bytes, _, had_errors) = encoding.encode(content);
    if had_errors {
        let mut scratch = [0u8; 4];
        let ch = content
            .chars()
            .find(|c| encoding.encode(c.encode_utf8(&mut scratch)).2)
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        return Err(EncodingError::UnsupportedCharacter { ch, charset });
    }

    Ok(bytes.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> Encoder {
        Encoder::with_native_qr(EncoderConfig::default())
    }

    fn hello_with_qr() -> JobDescription {
        JobDescription::new(vec![
            Segment::text("Hello"),
            Segment::qr("https://example.com", 4),
        ])
    }

    #[test]
    fn one_frame_per_segment_with_trailing_cut() {
        let frames = encoder().encode(&hello_with_qr()).expect("encode");
        assert_eq!(frames.len(), 2);

        let first = frames[0].as_bytes();
        assert!(first.starts_with(&[ESC, b'@', FS, b'.', ESC, b't', 16]));
        assert!(first.windows(6).any(|w| w == b"Hello\n"));

        let last = frames[1].as_bytes();
        assert!(last.ends_with(&cut()));
        assert!(last.windows(19).any(|w| w == b"https://example.com"));
    }

    #[test]
    fn explicit_cut_is_not_duplicated() {
        let desc = JobDescription::new(vec![Segment::text("a"), Segment::Cut]);
        let frames = encoder().encode(&desc).expect("encode");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].as_bytes(), &cut());

        let all: Vec<u8> = frames.into_iter().flat_map(CommandFrame::into_bytes).collect();
        assert_eq!(all.windows(4).filter(|w| *w == cut()).count(), 1);
    }

    #[test]
    fn encoding_is_deterministic() {
        let desc = JobDescription::new(vec![
            Segment::styled("Título", Alignment::Center, Emphasis::BoldDoubleSize),
            Segment::Feed { lines: 2 },
            Segment::qr("CUFE-123", 6),
            Segment::OpenDrawer { pin: DrawerPin::Pin5 },
        ]);
        let enc = encoder();
        let first = enc.encode(&desc).expect("encode");
        for _ in 0..10 {
            assert_eq!(enc.encode(&desc).expect("encode"), first);
        }
    }

    #[test]
    fn golden_text_frame() {
        let desc = JobDescription::new(vec![
            Segment::styled("Ñu", Alignment::Right, Emphasis::Bold),
            Segment::Cut,
        ]);
        let frames = encoder().encode(&desc).expect("encode");
        let expected: Vec<u8> = vec![
            ESC, b'@', FS, b'.', ESC, b't', 16, // init + code page
            ESC, b'a', 2, // right
            ESC, b'E', 1, // bold on
            0xD1, b'u', LF, // "Ñu" in windows-1252
            ESC, b'E', 0, // bold off
            ESC, b'a', 0, // back to left
        ];
        assert_eq!(frames[0].as_bytes(), expected.as_slice());
    }

    #[test]
    fn module_size_is_clamped() {
        let desc = JobDescription::new(vec![Segment::qr("x", 40), Segment::qr("y", 0)]);
        let frames = encoder().encode(&desc).expect("encode");
        let size_cmd = |frame: &CommandFrame| {
            let bytes = frame.as_bytes();
            let pos = bytes
                .windows(7)
                .position(|w| w == [GS, b'(', b'k', 0x03, 0x00, 0x31, 0x43])
                .expect("module size command");
            bytes[pos + 7]
        };
        assert_eq!(size_cmd(&frames[0]), 16);
        assert_eq!(size_cmd(&frames[1]), 1);
    }

    #[test]
    fn unsupported_character_is_an_encoding_error() {
        let desc = JobDescription::new(vec![Segment::text("price 5€ 中")]);
        let err = encoder().encode(&desc).unwrap_err();
        assert_eq!(
            err,
            EncodingError::UnsupportedCharacter {
                ch: '中',
                charset: Charset::Windows1252
            }
        );
    }

    #[test]
    fn gbk_charset_accepts_chinese() {
        let config = EncoderConfig {
            charset: Charset::Gbk,
            ..EncoderConfig::default()
        };
        let frames = Encoder::with_native_qr(config)
            .encode(&JobDescription::new(vec![Segment::text("厨房单")]))
            .expect("encode");
        assert!(frames[0].as_bytes().starts_with(&[ESC, b'@', FS, b'&']));
    }

    #[test]
    fn oversized_qr_is_an_encoding_error() {
        let config = EncoderConfig {
            max_qr_payload: 10,
            ..EncoderConfig::default()
        };
        let desc = JobDescription::new(vec![Segment::qr("01234567890", 4)]);
        assert_eq!(
            Encoder::with_native_qr(config).encode(&desc),
            Err(EncodingError::QrTooLarge { len: 11, max: 10 })
        );
    }

    #[test]
    fn golden_image_frame() {
        let desc = JobDescription::new(vec![
            Segment::image(crate::raster::tests::striped_png()),
            Segment::Cut,
        ]);
        let frames = encoder().encode(&desc).expect("encode");
        let expected: Vec<u8> = vec![
            ESC, b'@', FS, b'.', ESC, b't', 16, // init + code page
            ESC, b'a', 1, // centre
            GS, b'v', b'0', 0, 1, 0, 2, 0, // 1 byte x 2 rows
            0xFF, 0x00, // black row, white row
            ESC, b'a', 0,
        ];
        assert_eq!(frames[0].as_bytes(), expected.as_slice());
    }

    #[test]
    fn bad_image_fails_encoding_and_check() {
        let desc = JobDescription::new(vec![Segment::image("bm90IGFuIGltYWdl")]);
        let enc = encoder();
        assert!(matches!(enc.encode(&desc), Err(EncodingError::Image(_))));
        assert!(matches!(enc.check_images(&desc), Err(EncodingError::Image(_))));
        assert!(enc.check_images(&hello_with_qr()).is_ok());
    }

    #[test]
    fn drawer_kick_after_cut_gets_no_second_cut() {
        let desc = JobDescription::new(vec![
            Segment::text("a"),
            Segment::Cut,
            Segment::OpenDrawer { pin: DrawerPin::Pin2 },
        ]);
        let all: Vec<u8> = encoder()
            .encode(&desc)
            .expect("encode")
            .into_iter()
            .flat_map(CommandFrame::into_bytes)
            .collect();
        assert_eq!(all.windows(4).filter(|w| *w == cut()).count(), 1);
        assert!(all.ends_with(&[ESC, b'p', 0, 25, 250]));
    }

    #[test]
    fn drawer_kick_uses_selected_pin() {
        let desc = JobDescription::new(vec![Segment::OpenDrawer { pin: DrawerPin::Pin2 }, Segment::Cut]);
        let frames = encoder().encode(&desc).expect("encode");
        assert!(frames[0].as_bytes().ends_with(&[ESC, b'p', 0, 25, 250]));
    }
}
