// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for ESC/POS encoding and the invoice template in the
// puente-print crate.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use puente_core::config::EncoderConfig;
use puente_core::types::{Alignment, Emphasis, JobDescription, Segment};
use puente_print::encoder::Encoder;
use puente_print::invoice::{Company, Invoice, InvoiceItem};

fn sample_invoice(items: usize) -> Invoice {
    Invoice {
        company: Some(Company {
            name: "Panadería La Espiga".into(),
            address: "Carrera 7 # 12-40".into(),
            phone: "3001234567".into(),
            nit: "900123456-7".into(),
        }),
        sale_number: "F-000123".into(),
        items: (0..items)
            .map(|i| InvoiceItem {
                name: format!("Producto {i}"),
                quantity: 2,
                price: 1500.0,
            })
            .collect(),
        total: 3000.0 * items as f64,
        date: "2025-03-01 10:00".into(),
        cufe: Some("a".repeat(96)),
        ..Default::default()
    }
}

fn bench_encode_text(c: &mut Criterion) {
    let encoder = Encoder::with_native_qr(EncoderConfig::default());
    let job = JobDescription::new(
        (0..40)
            .map(|i| Segment::styled(format!("Línea {i}: café con leche"), Alignment::Left, Emphasis::Normal))
            .collect(),
    );

    c.bench_function("encode (40 text lines)", |b| {
        b.iter(|| encoder.encode(black_box(&job)))
    });
}

fn bench_encode_invoice(c: &mut Criterion) {
    let encoder = Encoder::with_native_qr(EncoderConfig::default());

    c.bench_function("invoice to_job + encode (25 items)", |b| {
        let invoice = sample_invoice(25);
        b.iter(|| {
            let job = black_box(&invoice).to_job(48);
            encoder.encode(&job)
        })
    });
}

criterion_group!(benches, bench_encode_text, bench_encode_invoice);
criterion_main!(benches);
