// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Kitchen order ticket template.
//
// Products print upper-cased: double size on 80 mm paper, bold on 58 mm paper
// where long names and notes are wrapped to the line width.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use puente_core::types::{Alignment, DrawerPin, Emphasis, JobDescription, Segment};

const DEFAULT_ATTENDANT: &str = "Sistema";
const DEFAULT_ORDER_ID: &str = "1";

/// Widest paper, in characters, that gets the compact layout.
const NARROW_PAPER: usize = 32;

/// Header of an order as sent by the point-of-sale client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderData {
    #[serde(deserialize_with = "string_or_number")]
    pub id: Option<String>,
    /// Delivery number, shown instead of `id` for delivery orders.
    #[serde(deserialize_with = "string_or_number")]
    pub order_number: Option<String>,
    pub client_name: Option<String>,
    pub date: Option<String>,
    pub phone: Option<String>,
    pub shipping_address: Option<String>,
    pub note: Option<String>,
    /// Print timestamp; the bridge's clock is used when absent.
    pub date_print: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderClient {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderUser {
    pub name: Option<String>,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderProduct {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

/// A kitchen order ticket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    pub order_data: OrderData,
    pub client_info: Option<OrderClient>,
    pub products: Vec<OrderProduct>,
    pub general_note: Option<String>,
    pub user: Option<OrderUser>,
    /// Kick the cash drawer once the ticket is cut.
    #[serde(alias = "open_cash")]
    pub open_drawer: bool,
}

/// Ids arrive as JSON strings or numbers.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(D::Error::custom(format!("expected a string or number, got {other}"))),
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Order {
    fn client_name(&self) -> Option<&str> {
        present(&self.order_data.client_name)
            .or_else(|| self.client_info.as_ref().and_then(|c| present(&c.name)))
    }

    fn note(&self) -> Option<&str> {
        present(&self.order_data.note).or_else(|| present(&self.general_note))
    }

    fn attendant(&self) -> &str {
        self.user
            .as_ref()
            .and_then(|u| present(&u.name).or_else(|| present(&u.nickname)))
            .unwrap_or(DEFAULT_ATTENDANT)
    }

    /// Delivery orders are known by their order number.
    fn display_id(&self) -> &str {
        let data = &self.order_data;
        present(&data.shipping_address)
            .and_then(|_| present(&data.order_number))
            .or_else(|| present(&data.id))
            .unwrap_or(DEFAULT_ORDER_ID)
    }

    /// Lay the ticket out for paper `paper_width` characters wide.
    pub fn to_job(&self, paper_width: usize) -> JobDescription {
        let narrow = paper_width <= NARROW_PAPER;
        let heading = if narrow { Emphasis::Bold } else { Emphasis::BoldDoubleSize };
        let mut segments = Vec::new();
        let left = |text: String| Segment::text(text);
        let bold = |text: String| Segment::styled(text, Alignment::Left, Emphasis::Bold);
        let centred = |text: String| Segment::styled(text, Alignment::Center, Emphasis::Normal);

        if let Some(name) = self.client_name() {
            let name = if narrow { truncate(name, paper_width) } else { name.to_string() };
            segments.push(Segment::styled(name, Alignment::Center, heading));
        }
        if let Some(date) = present(&self.order_data.date) {
            segments.push(centred(date.to_string()));
        }
        if let Some(phone) = present(&self.order_data.phone) {
            segments.push(centred(format!("CEL: {phone}")));
        }
        if let Some(address) = present(&self.order_data.shipping_address) {
            segments.push(centred(format!("DIRECCION: {address}")));
        }

        let separator = "-".repeat(paper_width);
        segments.push(left(separator.clone()));
        segments.push(bold(if narrow { "CANT  ITEM" } else { "CANT     ITEM" }.into()));
        segments.push(left(separator.clone()));

        // Quantity column (2) plus two spaces.
        let name_width = paper_width.saturating_sub(4).max(1);
        for (index, product) in self.products.iter().enumerate() {
            if index > 0 {
                segments.push(Segment::Feed { lines: 1 });
            }
            let name = product.name.to_uppercase();
            let quantity = product.quantity.to_string();
            if narrow {
                let (head, rest) = split_chars(&name, name_width);
                segments.push(bold(format!("{quantity:<2}  {head}")));
                if !rest.is_empty() {
                    segments.push(bold(format!("    {rest}")));
                }
            } else {
                segments.push(Segment::styled(
                    format!("{quantity:<2}  {name}"),
                    Alignment::Left,
                    heading,
                ));
            }

            if let Some(notes) = present(&product.notes) {
                let notes = notes.to_uppercase();
                if narrow {
                    for line in wrap(&notes, name_width) {
                        segments.push(bold(format!("  * {line}")));
                    }
                } else {
                    segments.push(bold(format!("    * {notes}")));
                }
            }
        }
        segments.push(left(separator));

        if let Some(note) = self.note() {
            segments.push(bold(format!("NOTA: {}", note.to_uppercase())));
            segments.push(Segment::Feed { lines: 1 });
        }

        segments.push(left(format!("Atendido por: {}", self.attendant())));
        let printed_at = present(&self.order_data.date_print)
            .map(str::to_string)
            .unwrap_or_else(|| chrono::Local::now().format("%d/%m/%Y %H:%M:%S").to_string());
        segments.push(left(format!("Impresión: {printed_at}")));
        segments.push(bold(format!("ORDEN: {}", self.display_id())));

        segments.push(Segment::Feed { lines: 1 });
        segments.push(Segment::Cut);
        if self.open_drawer {
            segments.push(Segment::OpenDrawer {
                pin: DrawerPin::Pin2,
            });
        }

        JobDescription::new(segments)
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Split after `at` characters.
fn split_chars(text: &str, at: usize) -> (&str, &str) {
    match text.char_indices().nth(at) {
        Some((byte, _)) => text.split_at(byte),
        None => (text, ""),
    }
}

/// Greedy word wrap; words longer than a line are broken.
fn wrap(text: &str, max: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word;
        while word.chars().count() > max {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let (head, rest) = split_chars(word, max);
            lines.push(head.to_string());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }
        let needed = current.chars().count() + word.chars().count() + usize::from(!current.is_empty());
        if needed > max && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
