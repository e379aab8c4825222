//! Command buffer management.

use crate::error::{GpuError, Result};
use ash::vk;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single primary command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffer(&self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        buffers
            .first()
            .copied()
            .ok_or_else(|| GpuError::InvalidState("no command buffer allocated".to_string()))
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.pool != vk::CommandPool::null() {
            device.destroy_command_pool(self.pool, None);
            self.pool = vk::CommandPool::null();
        }
    }
}

/// Record one command buffer, submit it once and block until the queue is
/// idle.
///
/// Any failure to record, submit or wait is reported as
/// [`GpuError::BuildSubmission`]. The command buffer is freed once it can no
/// longer be pending. If the queue wait fails after a successful submit, the
/// whole device is waited on first; if that fails too the buffer is left to
/// the pool.
///
/// # Safety
/// All handles must be valid and the pool must belong to `queue`'s family.
pub unsafe fn submit_and_wait<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    record: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let cmd = pool
        .allocate_command_buffer(device)
        .map_err(|e| GpuError::BuildSubmission(format!("allocate command buffer: {e}")))?;

    match record_and_submit(device, cmd, queue, record) {
        Ok(()) => {
            device.free_command_buffers(pool.handle(), &[cmd]);
            Ok(())
        }
        Err(failure) => {
            if !failure.is_pending() || device.device_wait_idle().is_ok() {
                device.free_command_buffers(pool.handle(), &[cmd]);
            } else {
                tracing::warn!("Command buffer may still be executing, not freeing it");
            }
            Err(failure.into_error())
        }
    }
}

/// Where a one-shot submission failed.
#[derive(Debug)]
enum SubmitFailure {
    /// The command buffer never reached the queue.
    Unsubmitted(GpuError),
    /// The command buffer was submitted but completion was not observed.
    Pending(GpuError),
}

impl SubmitFailure {
    fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    fn into_error(self) -> GpuError {
        match self {
            Self::Unsubmitted(e) | Self::Pending(e) => e,
        }
    }
}

unsafe fn record_and_submit<F>(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    queue: vk::Queue,
    record: F,
) -> std::result::Result<(), SubmitFailure>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(cmd, &begin_info).map_err(|e| {
        SubmitFailure::Unsubmitted(GpuError::BuildSubmission(format!(
            "begin command buffer: {e}"
        )))
    })?;

    record(cmd).map_err(SubmitFailure::Unsubmitted)?;

    device.end_command_buffer(cmd).map_err(|e| {
        SubmitFailure::Unsubmitted(GpuError::BuildSubmission(format!(
            "end command buffer: {e}"
        )))
    })?;

    let cmd_buffers = [cmd];
    let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
    device
        .queue_submit(queue, &[submit_info], vk::Fence::null())
        .map_err(|e| {
            SubmitFailure::Unsubmitted(GpuError::BuildSubmission(format!("queue submit: {e}")))
        })?;
    device.queue_wait_idle(queue).map_err(|e| {
        SubmitFailure::Pending(GpuError::BuildSubmission(format!("queue wait idle: {e}")))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failed_waits_leave_work_pending() {
        let wait = SubmitFailure::Pending(GpuError::BuildSubmission("wait".to_string()));
        assert!(wait.is_pending());
        assert!(matches!(wait.into_error(), GpuError::BuildSubmission(_)));

        let submit = SubmitFailure::Unsubmitted(GpuError::BuildSubmission("submit".to_string()));
        assert!(!submit.is_pending());

        let record = SubmitFailure::Unsubmitted(GpuError::InvalidState("record".to_string()));
        assert!(!record.is_pending());
        assert!(matches!(record.into_error(), GpuError::InvalidState(_)));
    }
}
