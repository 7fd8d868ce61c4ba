#![allow(unused)]
use futures::executor::block_on;
use poi_window::{Device, GpuWindowExtractor, Matrix, Window, WindowExtractor};

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::{black_box, criterion_group, criterion_main};

use criterion::async_executor::FuturesExecutor;

const ROWS: [usize; 4] = [100, 1000, 5000, 20000];
const COLS: usize = 2400;

fn traces(rows: usize) -> Matrix<f32> {
    let data = (0..rows * COLS).map(|i| (i % 251) as f32).collect();
    Matrix::from_vec(rows, COLS, data).unwrap()
}

fn window() -> Window {
    Window::new(1000, 1999).unwrap()
}

fn extract(c: &mut Criterion) {
    {
        let mut group = c.benchmark_group("extract-sequential");
        for rows in ROWS {
            let matrix = traces(rows);
            let extractor = WindowExtractor::new(window());
            group.bench_with_input(BenchmarkId::new("extract-sequential", rows), &rows, |b, _| {
                b.iter(|| black_box(extractor.run(&matrix).unwrap()))
            });
        }
    }

    {
        let mut group = c.benchmark_group("extract-rayon");
        for rows in ROWS {
            let matrix = traces(rows);
            let extractor = WindowExtractor::new(window()).parallel(true);
            group.bench_with_input(BenchmarkId::new("extract-rayon", rows), &rows, |b, _| {
                b.iter(|| black_box(extractor.run(&matrix).unwrap()))
            });
        }
    }

    {
        let mut group = c.benchmark_group("extract-ndarray");
        for rows in ROWS {
            let array = ndarray::Array2::from_shape_vec((rows, COLS), traces(rows).into_vec())
                .unwrap();
            let window = window();
            group.bench_with_input(BenchmarkId::new("extract-ndarray", rows), &rows, |b, _| {
                b.iter(|| {
                    black_box(
                        array
                            .slice(ndarray::s![.., window.begin()..=window.end()])
                            .to_owned(),
                    )
                })
            });
        }
    }

    let Ok(device) = block_on(Device::new()) else {
        return;
    };
    {
        let mut group = c.benchmark_group("extract-wgpu");
        for rows in ROWS {
            let matrix = &traces(rows);
            let extractor = &GpuWindowExtractor::new(&device);
            group.bench_with_input(BenchmarkId::new("extract-wgpu", rows), &rows, |b, _| {
                b.to_async(FuturesExecutor).iter(move || async move {
                    black_box(extractor.extract(matrix, window()).await.unwrap())
                })
            });
        }
    }
}

criterion_group!(benches, extract);
criterion_main!(benches);
