use anyhow::Result;
use wgpu::BufferUsages;

use super::common::test_context;
use crate::{ComputeError, DType, Shape};

#[test]
fn test_upload_then_readback_roundtrip() -> Result<()> {
    let mut ctx = test_context()?;
    let data: Vec<f32> = (0..1000).map(|i| i as f32 * 0.5 - 100.0).collect();
    let tensor = ctx.create_tensor_with_data(Shape::new(&[10, 100])?, DType::F32, &data)?;

    assert_eq!(ctx.read_f32(&tensor)?, data);
    Ok(())
}

#[test]
fn test_to_gpu_overwrites_prefix() -> Result<()> {
    let mut ctx = test_context()?;
    let tensor = ctx.create_tensor_with_data(Shape::new(&[8])?, DType::F32, &[1.0f32; 8])?;
    ctx.to_gpu(&[7.0f32, 8.0, 9.0], &tensor)?;

    let out = ctx.read_f32(&tensor)?;
    assert_eq!(out, vec![7.0, 8.0, 9.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
    Ok(())
}

#[test]
fn test_partial_readback() -> Result<()> {
    let mut ctx = test_context()?;
    let tensor = ctx.create_tensor_with_data(Shape::new(&[4])?, DType::U32, &[10u32, 20, 30, 40])?;

    let mut out = [0u8; 8];
    ctx.to_cpu(&tensor, &mut out)?;
    assert_eq!(bytemuck::cast_slice::<u8, u32>(&out), &[10, 20]);
    assert_eq!(ctx.read_vec::<u32>(&tensor)?, vec![10, 20, 30, 40]);
    Ok(())
}

#[test]
fn test_transfer_length_rules() -> Result<()> {
    let mut ctx = test_context()?;
    let tensor = ctx.create_tensor(Shape::new(&[4])?, DType::F32)?;

    let mut unaligned = [0u8; 6];
    assert!(matches!(
        ctx.to_cpu(&tensor, &mut unaligned),
        Err(ComputeError::TransferSize { .. })
    ));
    let mut too_long = [0u8; 32];
    assert!(matches!(
        ctx.to_cpu(&tensor, &mut too_long),
        Err(ComputeError::TransferSize { .. })
    ));
    assert!(matches!(
        ctx.to_gpu(&[0.0f32; 5], &tensor),
        Err(ComputeError::TransferSize { .. })
    ));
    assert!(matches!(
        ctx.create_tensor_with_data(Shape::new(&[2])?, DType::F32, &[0.0f32; 3]),
        Err(ComputeError::TransferSize { .. })
    ));
    Ok(())
}

#[test]
fn test_free_invalidates_the_handle() -> Result<()> {
    let mut ctx = test_context()?;
    let a = ctx.create_tensor(Shape::new(&[256])?, DType::F32)?;
    let b = ctx.create_tensor(Shape::new(&[64])?, DType::F32)?;
    assert_eq!(ctx.tensor_pool().len(), 2);
    assert_eq!(ctx.allocated_bytes(), 256 * 4 + 64 * 4);

    ctx.free_tensor(&a)?;
    assert_eq!(ctx.tensor_pool().len(), 1);
    assert_eq!(ctx.allocated_bytes(), 64 * 4);
    assert!(!ctx.tensor_pool().contains(&a));

    assert!(matches!(ctx.free_tensor(&a), Err(ComputeError::StaleTensor(_))));
    assert!(matches!(ctx.read_f32(&a), Err(ComputeError::StaleTensor(_))));

    // The freed slot is reused, but the old handle still does not resolve.
    let c = ctx.create_tensor(Shape::new(&[16])?, DType::F32)?;
    assert_ne!(c.id(), a.id());
    assert!(matches!(ctx.read_f32(&a), Err(ComputeError::StaleTensor(_))));
    assert!(ctx.tensor_pool().contains(&b));
    assert!(ctx.tensor_pool().contains(&c));
    Ok(())
}

#[test]
fn test_tensor_from_another_context_is_rejected() -> Result<()> {
    let mut first = test_context()?;
    let mut second = test_context()?;
    let tensor = first.create_tensor(Shape::new(&[4])?, DType::F32)?;

    assert!(matches!(
        second.free_tensor(&tensor),
        Err(ComputeError::ForeignTensor { .. })
    ));
    assert!(first.tensor_pool().contains(&tensor));
    Ok(())
}

#[test]
fn test_teardown_with_live_tensors() -> Result<()> {
    let mut ctx = test_context()?;
    for n in 1..=8 {
        ctx.create_tensor(Shape::new(&[n * 32])?, DType::F32)?;
    }
    assert_eq!(ctx.tensor_pool().tensors().len(), 8);
    drop(ctx);
    Ok(())
}

#[test]
fn test_transfers_check_buffer_usage() -> Result<()> {
    let mut ctx = test_context()?;
    let shape = Shape::new(&[4])?;
    let write_only = ctx.tensor_pool_mut().create_with_usage(
        shape,
        DType::F32,
        BufferUsages::STORAGE | BufferUsages::COPY_DST,
        "write only",
    )?;
    let read_only = ctx.tensor_pool_mut().create_with_usage(
        shape,
        DType::F32,
        BufferUsages::STORAGE | BufferUsages::COPY_SRC,
        "read only",
    )?;

    let mut out = [0u8; 16];
    assert!(matches!(
        ctx.to_cpu(&write_only, &mut out),
        Err(ComputeError::MissingUsage { operation: "readback", .. })
    ));
    assert!(matches!(
        ctx.read_f32(&write_only),
        Err(ComputeError::MissingUsage { .. })
    ));
    assert!(matches!(
        ctx.to_gpu(&[1.0f32; 4], &read_only),
        Err(ComputeError::MissingUsage { operation: "upload", .. })
    ));

    let raw = ctx.device().create_buffer(&wgpu::BufferDescriptor {
        label: Some("no copy dst"),
        size: 16,
        usage: BufferUsages::STORAGE,
        mapped_at_creation: false,
    });
    assert!(matches!(
        ctx.write_buffer(&[0u8; 16], &raw),
        Err(ComputeError::MissingUsage { .. })
    ));

    // Rejected transfers leave both tensors usable.
    ctx.to_gpu(&[5.0f32; 4], &write_only)?;
    assert_eq!(ctx.read_f32(&read_only)?.len(), 4);
    Ok(())
}

#[test]
fn test_invalid_queue_write_is_logged_not_fatal() -> Result<()> {
    let mut ctx = test_context()?;
    let raw = ctx.device().create_buffer(&wgpu::BufferDescriptor {
        label: Some("no copy dst"),
        size: 16,
        usage: BufferUsages::STORAGE,
        mapped_at_creation: false,
    });
    // Goes straight to wgpu, past the usage checks.
    ctx.queue().write_buffer(&raw, 0, &[0u8; 16]);
    ctx.queue().submit(None);
    ctx.device().poll(wgpu::PollType::Poll)?;

    let tensor = ctx.create_tensor_with_data(Shape::new(&[2])?, DType::F32, &[1.5f32, 2.5])?;
    assert_eq!(ctx.read_f32(&tensor)?, vec![1.5, 2.5]);
    Ok(())
}

#[test]
fn test_host_type_must_match_dtype() -> Result<()> {
    let mut ctx = test_context()?;
    let shape = Shape::new(&[4])?;
    let floats = ctx.create_tensor(shape, DType::F32)?;
    let halves = ctx.create_tensor(shape, DType::F16)?;

    assert!(matches!(
        ctx.to_gpu(&[1u32, 2, 3, 4], &floats),
        Err(ComputeError::DTypeMismatch {
            host: DType::U32,
            tensor: DType::F32
        })
    ));
    // Byte length fits, element type does not.
    assert!(matches!(
        ctx.to_gpu(&[1.0f32, 2.0], &halves),
        Err(ComputeError::DTypeMismatch { .. })
    ));
    assert!(matches!(
        ctx.read_vec::<u32>(&floats),
        Err(ComputeError::DTypeMismatch { .. })
    ));
    assert!(matches!(
        ctx.create_tensor_with_data(shape, DType::F32, &[0i32; 4]),
        Err(ComputeError::DTypeMismatch { .. })
    ));
    assert!(matches!(
        ctx.create_tensor_with_data(Shape::new(&[8])?, DType::F16, &[1.0f32; 4]),
        Err(ComputeError::DTypeMismatch { .. })
    ));
    assert_eq!(ctx.tensor_pool().len(), 2);
    Ok(())
}

#[test]
fn test_oversized_tensors_are_rejected() -> Result<()> {
    let mut ctx = test_context()?;
    assert!(matches!(
        ctx.create_tensor(Shape::new(&[1 << 62, 4])?, DType::F32),
        Err(ComputeError::TensorTooLarge { .. })
    ));

    let max = ctx.device().limits().max_buffer_size;
    let past_limit = Shape::new(&[(max / 4) as usize + 1])?;
    assert!(matches!(
        ctx.create_tensor(past_limit, DType::F32),
        Err(ComputeError::TensorTooLarge { .. })
    ));
    assert!(ctx.tensor_pool().is_empty());
    assert_eq!(ctx.allocated_bytes(), 0);
    Ok(())
}
