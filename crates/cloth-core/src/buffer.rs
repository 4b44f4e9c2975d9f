use bytemuck::Pod;

/// Which copy of a mirrored buffer the simulation reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residency {
    /// Single copy in host memory.
    Host,
    /// Host copy plus a device copy that is authoritative while simulating.
    Device,
}

/// Host/device mirrored storage with explicit synchronization.
///
/// Writes through one side mark the other side stale. Nothing is copied
/// implicitly except by the `*_mut` accessors, which pull the newer copy
/// across before handing out a mutable view.
#[derive(Clone, Debug)]
pub struct MirroredBuffer<T: Pod> {
    host: Vec<T>,
    device: Vec<T>,
    residency: Residency,
    host_stale: bool,
    device_stale: bool,
}

impl<T: Pod> MirroredBuffer<T> {
    pub fn new(data: Vec<T>, residency: Residency) -> Self {
        let device = match residency {
            Residency::Host => Vec::new(),
            Residency::Device => data.clone(),
        };
        Self {
            host: data,
            device,
            residency,
            host_stale: false,
            device_stale: false,
        }
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    pub fn is_host_stale(&self) -> bool {
        self.host_stale
    }

    pub fn is_device_stale(&self) -> bool {
        self.device_stale
    }

    /// Host view as last synchronized. Check `is_host_stale` when the
    /// device copy may have been written since.
    pub fn host(&self) -> &[T] {
        &self.host
    }

    /// Mutable host view; the device copy becomes stale.
    pub fn host_mut(&mut self) -> &mut [T] {
        self.sync_to_host();
        if self.residency == Residency::Device {
            self.device_stale = true;
        }
        &mut self.host
    }

    /// The copy the simulation works on; the host copy becomes stale.
    pub fn device_mut(&mut self) -> &mut [T] {
        match self.residency {
            Residency::Host => &mut self.host,
            Residency::Device => {
                self.sync_to_device();
                self.host_stale = true;
                &mut self.device
            }
        }
    }

    pub fn device(&self) -> &[T] {
        match self.residency {
            Residency::Host => &self.host,
            Residency::Device => &self.device,
        }
    }

    pub fn sync_to_host(&mut self) {
        if self.host_stale {
            self.host.copy_from_slice(&self.device);
            self.host_stale = false;
        }
    }

    pub fn sync_to_device(&mut self) {
        if self.device_stale {
            self.device.copy_from_slice(&self.host);
            self.device_stale = false;
        }
    }

    /// Size of one copy in bytes.
    pub fn byte_len(&self) -> usize {
        bytemuck::cast_slice::<T, u8>(&self.host).len()
    }

    /// Move the buffer to another residency, keeping the newest contents.
    pub fn migrate(&mut self, residency: Residency) {
        self.sync_to_host();
        self.host_stale = false;
        self.device_stale = false;
        self.device = match residency {
            Residency::Host => Vec::new(),
            Residency::Device => self.host.clone(),
        };
        self.residency = residency;
    }
}

/// Start/target pair interpolated across the sub-steps of a frame.
///
/// The first push initializes `start`; later pushes write `target`, which
/// replaces `start` when the frame ends.
#[derive(Clone, Debug, Default)]
pub struct DoubleBuffer<T> {
    pub start: Vec<T>,
    pub target: Vec<T>,
}

impl<T: Copy> DoubleBuffer<T> {
    pub fn new() -> Self {
        Self {
            start: Vec::new(),
            target: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    pub fn len(&self) -> usize {
        self.start.len()
    }

    pub fn push(&mut self, values: &[T]) {
        if self.start.is_empty() {
            self.start = values.to_vec();
            self.target.clear();
        } else {
            self.target.clear();
            self.target.extend_from_slice(values);
        }
    }

    pub fn pop(&mut self) {
        if !self.target.is_empty() {
            std::mem::swap(&mut self.start, &mut self.target);
            self.target.clear();
        }
    }

    pub fn clear(&mut self) {
        self.start.clear();
        self.target.clear();
    }

    pub fn clear_target(&mut self) {
        self.target.clear();
    }

    /// Target values if present, else start.
    pub fn latest(&self) -> &[T] {
        if self.target.is_empty() {
            &self.start
        } else {
            &self.target
        }
    }
}
