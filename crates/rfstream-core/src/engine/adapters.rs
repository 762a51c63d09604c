//! Boundary operations inserted by the compiler: host→device ingress and
//! device→host egress.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Sender, TrySendError};

use crate::array::{Array, Value};
use crate::buffer::{BufferElement, RingBuffer};
use crate::descriptor::Descriptor;
use crate::device::Stream;
use crate::error::OperationError;
use crate::operation::Operation;
use crate::processing::OutputCallback;

/// Moves each host frame into the device input ring.
///
/// The copy runs on the transfer stream. The host element is released on the
/// transfer stream right after the copy, and the compute stream is told to
/// wait for the copy before running anything enqueued after this frame. The
/// values handed downstream are views of the device element, gated on the
/// transfer event.
pub(crate) struct DeviceIngress {
    device_input: Arc<RingBuffer>,
    transfer: Arc<Stream>,
    compute: Arc<Stream>,
    position: usize,
}

impl DeviceIngress {
    pub(crate) fn new(
        device_input: Arc<RingBuffer>,
        transfer: Arc<Stream>,
        compute: Arc<Stream>,
    ) -> Self {
        Self {
            device_input,
            transfer,
            compute,
            position: 0,
        }
    }
}

impl Operation for DeviceIngress {
    fn type_name(&self) -> &str {
        "DeviceIngress"
    }

    fn prepare(&mut self, inputs: &[Descriptor]) -> Result<Vec<Descriptor>, OperationError> {
        Ok(inputs.to_vec())
    }

    fn process(&mut self, inputs: &[Value]) -> Result<Option<Vec<Value>>, OperationError> {
        let host = inputs
            .first()
            .and_then(Value::as_element)
            .cloned()
            .ok_or_else(|| {
                OperationError::InvalidValue("ingress expects a host buffer element".to_string())
            })?;

        // On overrun the frame is lost but the host element goes back to the producer.
        let device = match self.device_input.acquire(self.position) {
            Ok(device) => device,
            Err(err) => {
                if let Err(release_err) = host.release() {
                    tracing::error!(%release_err, "failed to release host input element");
                }
                return Err(err.into());
            }
        };

        let (src, dst) = (Arc::clone(&host), Arc::clone(&device));
        self.transfer.enqueue(move || {
            if let Err(err) = dst.copy_from(&src) {
                tracing::error!(%err, "host to device copy failed");
            }
        });
        let copied = self.transfer.record();
        self.transfer.launch_host_func(move || {
            if let Err(err) = host.release() {
                tracing::error!(%err, "failed to release host input element");
            }
        });
        self.position = (self.position + 1) % self.device_input.len();
        self.compute.wait_event(&copied);

        let outputs = (0..device.array_count())
            .filter_map(|i| device.array(i))
            .map(|view| Value::Slot(view.gated(copied.clone())))
            .collect();
        Ok(Some(outputs))
    }
}

/// Copies each frame's outputs into the host output ring and delivers them.
///
/// Everything happens on the compute stream, in order: acquire the next host
/// output element, copy the outputs, release the oldest device input element,
/// and hand the output element to the delivery callback.
pub(crate) struct DeviceEgress {
    device_input: Arc<RingBuffer>,
    host_output: Arc<RingBuffer>,
    compute: Arc<Stream>,
    deliver: OutputCallback,
    dropped: Arc<AtomicU64>,
    position: usize,
}

impl DeviceEgress {
    pub(crate) fn new(
        device_input: Arc<RingBuffer>,
        host_output: Arc<RingBuffer>,
        compute: Arc<Stream>,
        deliver: OutputCallback,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            device_input,
            host_output,
            compute,
            deliver,
            dropped,
            position: 0,
        }
    }
}

impl Operation for DeviceEgress {
    fn type_name(&self) -> &str {
        "DeviceEgress"
    }

    fn prepare(&mut self, inputs: &[Descriptor]) -> Result<Vec<Descriptor>, OperationError> {
        Ok(inputs.to_vec())
    }

    fn process(&mut self, inputs: &[Value]) -> Result<Option<Vec<Value>>, OperationError> {
        let values = inputs.to_vec();
        let host_output = Arc::clone(&self.host_output);
        let device_input = Arc::clone(&self.device_input);
        let deliver = Arc::clone(&self.deliver);
        let dropped = Arc::clone(&self.dropped);
        let position = self.position;

        self.compute.enqueue(move || {
            let output = host_output.acquire(position).and_then(|element| {
                match copy_outputs(&element, &values) {
                    Ok(()) => Ok(element),
                    Err(err) => {
                        if let Err(release_err) = element.release() {
                            tracing::error!(%release_err, "failed to release host output element");
                        }
                        Err(err)
                    }
                }
            });
            drop(values);
            if let Err(err) = device_input.release_oldest_acquired() {
                tracing::error!(%err, "failed to release device input element");
            }
            match output {
                Ok(element) => deliver(element),
                Err(err) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%err, "output frame dropped");
                }
            }
        });
        self.position = (self.position + 1) % self.host_output.len();
        Ok(None)
    }
}

fn copy_outputs(element: &BufferElement, values: &[Value]) -> Result<(), crate::error::BufferError> {
    for (index, value) in values.iter().enumerate() {
        let bytes = value.bytes().map_err(|err| {
            crate::error::BufferError::LayoutMismatch(format!("output {index}: {err}"))
        })?;
        element.write_array(index, &bytes)?;
    }
    Ok(())
}

/// Delivery used when no callback is configured: copy the arrays out, release
/// the element, and offer the frame to a bounded queue, dropping it when the
/// consumer has not taken the previous one.
pub(crate) fn queue_delivery(queue: Sender<Vec<Array>>, dropped: Arc<AtomicU64>) -> OutputCallback {
    Arc::new(move |element: Arc<BufferElement>| {
        let arrays = element.to_arrays();
        if let Err(err) = element.release() {
            tracing::error!(%err, "failed to release output element");
        }
        let arrays = match arrays {
            Ok(arrays) => arrays,
            Err(err) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(%err, "failed to copy output frame");
                return;
            }
        };
        match queue.try_send(arrays) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("output queue full, frame dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::trace!("output queue disconnected, frame dropped");
            }
        }
    })
}
