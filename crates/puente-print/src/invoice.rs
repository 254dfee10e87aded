// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sales invoice receipt template.
//
// Lays out a point-of-sale invoice (company header, customer block, item
// lines, total, CUFE QR code, footer) as an ordinary job description, so it
// goes through the same queue and encoder as any other job.

use serde::{Deserialize, Serialize};

use puente_core::types::{Alignment, DrawerPin, Emphasis, JobDescription, Segment};

const DEFAULT_CUSTOMER: &str = "Consumidor Final";
const DEFAULT_DOCUMENT: &str = "222222222222";
const DEFAULT_PAYMENT: &str = "Efectivo";
const DEFAULT_ATTENDANT: &str = "admin";
const DEFAULT_FOOTER: &str = "¡Gracias por tu compra!";
const CUFE_MODULE_SIZE: u8 = 4;
const QTY_COLUMN: usize = 4;

/// Issuing company, printed centred at the top.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Company {
    pub name: String,
    pub address: String,
    pub phone: String,
    /// Tax id.
    pub nit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub price: f64,
}

fn default_quantity() -> u32 {
    1
}

/// A sales invoice as posted by the point-of-sale client.
///
/// Missing or empty fields fall back to the counter defaults (anonymous
/// customer, cash payment).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Invoice {
    #[serde(alias = "company_info")]
    pub company: Option<Company>,
    pub sale_number: String,
    pub customer_name: String,
    pub customer_document: String,
    pub items: Vec<InvoiceItem>,
    pub total: f64,
    pub payment_method: String,
    pub attended_by: String,
    pub date: String,
    /// Electronic invoice code, printed as a QR code.
    pub cufe: Option<String>,
    /// Lines printed centred after the body.
    pub footer: Option<Vec<String>>,
    /// Kick the cash drawer once the receipt is cut.
    pub open_drawer: bool,
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() { default } else { value }
}

/// One item row: name left, quantity and value right-aligned, `width`
/// characters in total. Names that do not fit are truncated.
fn item_row(name: &str, quantity: &str, value: &str, width: usize) -> String {
    let value_width = (width / 4).max(value.chars().count());
    let name_width = width.saturating_sub(QTY_COLUMN + value_width + 2);
    let name: String = name.chars().take(name_width).collect();
    format!("{name:<name_width$} {quantity:>QTY_COLUMN$} {value:>value_width$}")
}

impl Invoice {
    /// Lay the invoice out for paper `paper_width` characters wide.
    pub fn to_job(&self, paper_width: usize) -> JobDescription {
        let mut segments = Vec::new();
        let left = |text: String| Segment::text(text);
        let bold = |text: String| Segment::styled(text, Alignment::Left, Emphasis::Bold);
        let centred = |text: String| Segment::styled(text, Alignment::Center, Emphasis::Normal);

        if let Some(company) = &self.company {
            if !company.name.is_empty() {
                segments.push(Segment::styled(
                    company.name.clone(),
                    Alignment::Center,
                    Emphasis::Bold,
                ));
            }
            for (label, value) in [
                ("DIRECCIÓN", &company.address),
                ("CELULAR", &company.phone),
                ("NIT", &company.nit),
            ] {
                if !value.is_empty() {
                    segments.push(centred(format!("{label}: {value}")));
                }
            }
        }

        segments.push(Segment::Feed { lines: 1 });
        segments.push(centred("=".repeat(paper_width)));

        if !self.sale_number.is_empty() {
            segments.push(bold(format!("VENTA: {}", self.sale_number)));
        }
        segments.push(left(format!(
            "CLIENTE: {}",
            or_default(&self.customer_name, DEFAULT_CUSTOMER)
        )));
        segments.push(left(format!(
            "DOCUMENTO: {}",
            or_default(&self.customer_document, DEFAULT_DOCUMENT)
        )));

        segments.push(Segment::Feed { lines: 1 });
        segments.push(bold(item_row("ITEM", "CANT", "VALOR", paper_width)));
        for item in &self.items {
            segments.push(left(item_row(
                &item.name,
                &item.quantity.to_string(),
                &format!("$ {:.3}", item.price),
                paper_width,
            )));
        }
        segments.push(bold(format!("TOTAL $ {:.3}", self.total)));

        segments.push(left(format!(
            "Forma de pago: {}",
            or_default(&self.payment_method, DEFAULT_PAYMENT)
        )));
        segments.push(left(format!(
            "Atendido por: {}",
            or_default(&self.attended_by, DEFAULT_ATTENDANT)
        )));
        if !self.date.is_empty() {
            segments.push(left(format!("Generación: {}", self.date)));
        }

        // Upstream systems send the literal "null" when no CUFE was issued.
        if let Some(cufe) = self.cufe.as_deref().filter(|c| !c.is_empty() && *c != "null") {
            segments.push(Segment::Feed { lines: 1 });
            segments.push(centred("CUFE:".into()));
            segments.push(Segment::qr(cufe, CUFE_MODULE_SIZE));
            segments.push(Segment::Feed { lines: 1 });
        }

        match &self.footer {
            Some(lines) => segments.extend(lines.iter().cloned().map(centred)),
            None => segments.push(centred(DEFAULT_FOOTER.into())),
        }

        segments.push(Segment::Feed { lines: 2 });
        segments.push(Segment::Cut);
        if self.open_drawer {
            segments.push(Segment::OpenDrawer {
                pin: DrawerPin::Pin2,
            });
        }

        JobDescription::new(segments)
    }
}

#[cfg(test)]
mod tests {
    use puente_core::config::EncoderConfig;

    use super::*;
    use crate::encoder::{CommandFrame, Encoder};

    fn texts(job: &JobDescription) -> Vec<&str> {
        job.segments()
            .iter()
            .filter_map(|s| match s {
                Segment::Text { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_invoice_uses_counter_defaults() {
        let invoice: Invoice = serde_json::from_str("{}").expect("parse");
        let job = invoice.to_job(32);
        let lines = texts(&job);

        assert!(lines.contains(&"CLIENTE: Consumidor Final"));
        assert!(lines.contains(&"DOCUMENTO: 222222222222"));
        assert!(lines.contains(&"TOTAL $ 0.000"));
        assert!(lines.contains(&"Forma de pago: Efectivo"));
        assert!(lines.contains(&"Atendido por: admin"));
        assert!(lines.contains(&"¡Gracias por tu compra!"));
        assert!(lines.contains(&"================================"));
        assert!(job.ends_with_cut());
        assert!(job.validate(2953).is_ok());
    }

    #[test]
    fn full_invoice_layout() {
        let json = r#"{
            "company_info": {"name": "Tienda Sol", "address": "Calle 1", "nit": "900.1"},
            "sale_number": "F-17",
            "customer_name": "Ana",
            "items": [{"name": "Café", "quantity": 2, "price": 3.5}, {"name": "Pan"}],
            "total": 7.0,
            "date": "2025-03-01 10:00",
            "cufe": "abc123",
            "open_drawer": true
        }"#;
        let invoice: Invoice = serde_json::from_str(json).expect("parse");
        let job = invoice.to_job(48);

        match &job.segments()[0] {
            Segment::Text {
                content,
                align,
                emphasis,
            } => {
                assert_eq!(content, "Tienda Sol");
                assert_eq!(*align, Alignment::Center);
                assert_eq!(*emphasis, Emphasis::Bold);
            }
            other => panic!("unexpected first segment {other:?}"),
        }

        let lines = texts(&job);
        assert!(lines.contains(&"DIRECCIÓN: Calle 1"));
        assert!(lines.contains(&"NIT: 900.1"));
        assert!(!lines.iter().any(|l| l.starts_with("CELULAR")));
        assert!(lines.contains(&"VENTA: F-17"));
        assert!(lines.contains(&format!("Café{}2{}$ 3.500", " ".repeat(30), " ".repeat(6)).as_str()));
        assert!(lines.contains(&format!("Pan{}1{}$ 0.000", " ".repeat(31), " ".repeat(6)).as_str()));
        assert!(lines.contains(&"Generación: 2025-03-01 10:00"));

        assert!(job.segments().contains(&Segment::qr("abc123", CUFE_MODULE_SIZE)));
        assert_eq!(
            job.segments().last(),
            Some(&Segment::OpenDrawer {
                pin: DrawerPin::Pin2
            })
        );
    }

    #[test]
    fn drawer_invoice_is_cut_once() {
        let invoice = Invoice {
            open_drawer: true,
            ..Default::default()
        };
        let bytes: Vec<u8> = Encoder::with_native_qr(EncoderConfig::default())
            .encode(&invoice.to_job(48))
            .expect("encode")
            .into_iter()
            .flat_map(CommandFrame::into_bytes)
            .collect();
        let cuts = bytes.windows(4).filter(|w| *w == [0x1D, b'V', 66, 0]).count();
        assert_eq!(cuts, 1);
        assert!(bytes.ends_with(&[0x1B, b'p', 0, 25, 250]));
    }

    #[test]
    fn item_columns_line_up_on_both_paper_sizes() {
        let invoice = Invoice {
            items: vec![
                InvoiceItem {
                    name: "Café".into(),
                    quantity: 2,
                    price: 3.5,
                },
                InvoiceItem {
                    name: "Empanada de pollo con queso y maduro".into(),
                    quantity: 12,
                    price: 25.0,
                },
            ],
            ..Default::default()
        };

        for width in [32, 48] {
            let job = invoice.to_job(width);
            let lines = texts(&job);
            let header = lines
                .iter()
                .position(|l| l.starts_with("ITEM"))
                .expect("header");
            let rows = &lines[header..header + 3];
            for row in rows {
                assert_eq!(row.chars().count(), width, "{row:?}");
            }
            assert!(rows[0].ends_with(&format!("CANT{}VALOR", " ".repeat(width / 4 - 4))));
            // Quantities share a right-aligned column.
            let qty_end = width - width / 4 - 2;
            assert_eq!(rows[1].chars().nth(qty_end), Some('2'));
            assert_eq!(rows[2].chars().nth(qty_end), Some('2'));
        }

        assert!(texts(&invoice.to_job(32)).contains(&format!("Café{}2  $ 3.500", " ".repeat(18)).as_str()));
    }

    #[test]
    fn null_cufe_prints_no_qr() {
        let invoice = Invoice {
            cufe: Some("null".into()),
            footer: Some(vec!["Vuelva pronto".into()]),
            ..Default::default()
        };
        let job = invoice.to_job(32);
        assert!(!job.segments().iter().any(|s| matches!(s, Segment::Qr { .. })));
        assert!(texts(&job).contains(&"Vuelva pronto"));
        assert!(!texts(&job).contains(&DEFAULT_FOOTER));
    }
}
