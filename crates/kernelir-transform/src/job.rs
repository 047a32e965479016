use serde::{Deserialize, Serialize};

/// A launch dimension. Shorter tuples leave the missing axes at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dim3 {
    pub x: u32,
    #[serde(default = "one")]
    pub y: u32,
    #[serde(default = "one")]
    pub z: u32,
}

fn one() -> u32 {
    1
}

impl Dim3 {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn axes(&self) -> [(char, u32); 3] {
        [('x', self.x), ('y', self.y), ('z', self.z)]
    }
}

impl From<u32> for Dim3 {
    fn from(x: u32) -> Self {
        Self::new(x, 1, 1)
    }
}

impl From<(u32, u32)> for Dim3 {
    fn from((x, y): (u32, u32)) -> Self {
        Self::new(x, y, 1)
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Self::new(x, y, z)
    }
}

/// Opaque description of the device the module is compiled for; handed to the host optimizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetDescriptor {
    pub triple: String,
    pub cpu: String,
    pub features: String,
}

impl Default for TargetDescriptor {
    fn default() -> Self {
        Self {
            triple: "nvptx64-nvidia-cuda".to_string(),
            cpu: "sm_70".to_string(),
            features: "+ptx64".to_string(),
        }
    }
}

/// Contract with the device allocator runtime. `tag_size` must equal the header the runtime
/// reserves in front of every object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceRuntime {
    pub pool_alloc: String,
    pub tag_size: u64,
}

impl Default for DeviceRuntime {
    fn default() -> Self {
        Self {
            pool_alloc: "ptx_gc_pool_alloc".to_string(),
            tag_size: 8,
        }
    }
}

/// Everything a compilation request says about the entry point and the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerJob {
    pub kernel: bool,
    pub min_threads: Option<Dim3>,
    pub max_threads: Option<Dim3>,
    pub blocks_per_sm: Option<u32>,
    pub max_registers: Option<u32>,
    pub opt_level: u8,
    pub target: TargetDescriptor,
    pub runtime: DeviceRuntime,
}

impl Default for CompilerJob {
    fn default() -> Self {
        Self {
            kernel: false,
            min_threads: None,
            max_threads: None,
            blocks_per_sm: None,
            max_registers: None,
            opt_level: 2,
            target: TargetDescriptor::default(),
            runtime: DeviceRuntime::default(),
        }
    }
}

impl CompilerJob {
    pub fn kernel() -> Self {
        Self {
            kernel: true,
            ..Self::default()
        }
    }

    pub fn with_min_threads(mut self, threads: impl Into<Dim3>) -> Self {
        self.min_threads = Some(threads.into());
        self
    }

    pub fn with_max_threads(mut self, threads: impl Into<Dim3>) -> Self {
        self.max_threads = Some(threads.into());
        self
    }

    pub fn with_blocks_per_sm(mut self, blocks: u32) -> Self {
        self.blocks_per_sm = Some(blocks);
        self
    }

    pub fn with_max_registers(mut self, registers: u32) -> Self {
        self.max_registers = Some(registers);
        self
    }

    pub fn with_opt_level(mut self, level: u8) -> Self {
        self.opt_level = level;
        self
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
