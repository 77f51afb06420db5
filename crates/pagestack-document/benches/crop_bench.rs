// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the crop interaction geometry. Hit-testing and
// resize run once per pointer-move event, so they must stay far below a
// frame budget.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use pagestack_core::geometry::{CropRect, Point, Size};
use pagestack_document::crop::{HandleKind, hit_test, normalize, resize};

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// A full drag step: hit-test the pointer, resize through the handle, then
/// normalize as if the crop were being committed.
fn bench_drag_step(c: &mut Criterion) {
    let bounds = CropRect::new(0.0, 0.0, 1080.0, 1920.0);
    let rect = CropRect::new(120.0, 200.0, 960.0, 1700.0);

    c.bench_function("hit_test (miss)", |b| {
        b.iter(|| hit_test(black_box(Point::new(540.0, 960.0)), black_box(rect), 40.0));
    });

    c.bench_function("resize (all handles)", |b| {
        b.iter(|| {
            for handle in HandleKind::ALL {
                black_box(resize(
                    black_box(rect),
                    handle,
                    Point::new(-35.0, 18.0),
                    bounds,
                    48.0,
                ));
            }
        });
    });

    c.bench_function("drag step", |b| {
        b.iter(|| {
            let pointer = black_box(Point::new(125.0, 205.0));
            if let Some(handle) = hit_test(pointer, rect, 40.0) {
                let moved = resize(rect, handle, Point::new(-10.0, -10.0), bounds, 48.0);
                black_box(normalize(moved, Size::new(1080.0, 1920.0)));
            }
        });
    });
}

criterion_group!(benches, bench_drag_step);
criterion_main!(benches);
