// Shared by the GPU-backed test modules.
#![allow(dead_code)]

use std::time::Duration;

use anyhow::Context;

use crate::{ComputeContext, ContextConfig};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_config() -> ContextConfig {
    let mut config = ContextConfig::from_env();
    if config.wait.timeout.is_none() {
        config.wait.timeout = Some(Duration::from_secs(30));
    }
    config
}

/// A context on the machine's adapter, or on the noop backend when there is
/// none. Noop contexts run every host-side path but execute no shaders; see
/// `runs_shaders`.
pub fn test_context() -> anyhow::Result<ComputeContext> {
    init_logging();
    let config = test_config();
    match ComputeContext::with_config(config.clone()) {
        Ok(ctx) => Ok(ctx),
        Err(e) => {
            log::warn!("no hardware adapter ({}), using the noop backend", e);
            let noop = ContextConfig {
                backends: wgpu::Backends::NOOP,
                ..config
            };
            ComputeContext::with_config(noop).context("noop backend unavailable")
        }
    }
}

/// Whether dispatches on `ctx` actually compute anything.
pub fn runs_shaders(ctx: &ComputeContext) -> bool {
    ctx.adapter().get_info().backend != wgpu::Backend::Noop
}

pub fn gelu_reference(x: f32) -> f32 {
    if x > 10.0 {
        return x;
    }
    let k = 0.797_884_6_f32;
    0.5 * x * (1.0 + (k * (x + 0.044715 * x * x * x)).tanh())
}

pub fn matmul_reference(a: &[f32], b: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
    let mut c = vec![0.0; m * n];
    for row in 0..m {
        for col in 0..n {
            c[row * n + col] = (0..k).map(|i| a[row * k + i] * b[i * n + col]).sum();
        }
    }
    c
}

pub fn assert_vecs_are_close(expected: &[f32], actual: &[f32], tolerance: f32) {
    assert_eq!(
        expected.len(),
        actual.len(),
        "vectors have different lengths: {} vs {}",
        expected.len(),
        actual.len()
    );

    for (i, (&a, &b)) in expected.iter().zip(actual.iter()).enumerate() {
        let diff = (a - b).abs();
        if diff > tolerance {
            let start = i.saturating_sub(2);
            let end = (i + 3).min(expected.len());
            panic!(
                "vectors differ at index {}:\n\
                 CPU value: {:.8}\n\
                 GPU value: {:.8}\n\
                 difference: {:.8} (tolerance: {:.8})\n\
                 context [{}-{}]:\n\
                   CPU: {:?}\n\
                   GPU: {:?}",
                i,
                a,
                b,
                diff,
                tolerance,
                start,
                end,
                &expected[start..end],
                &actual[start..end]
            );
        }
    }
}
