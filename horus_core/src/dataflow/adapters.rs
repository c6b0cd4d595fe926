//! Motor/camera adapters (§4.A, out of scope as wire protocols; the core
//! only sees `read_positions`/`write_positions`/`capture`). Each family is
//! one enum with match-dispatch over concrete backends, per the design
//! notes' adapter-polymorphism guidance — no trait-object hierarchy.
//!
//! Every family ships a simulation backend so the rest of the system is
//! exercisable without hardware; real backends are reached only when the
//! `serial-hardware` feature is enabled and a real port is configured.

use crate::error::{HorusError, HorusResult};
use crate::joints::{JointUnit, JointVector};
use std::time::Instant;

const NUM_JOINTS: usize = 6;

/// The leader arm adapter: emits joint readings in radians (§4.D contract).
pub enum LeaderDriver {
    Simulation(LeaderSimulation),
    #[cfg(feature = "serial-hardware")]
    SerialZhonglin(SerialLeader),
}

pub struct LeaderSimulation {
    start: Instant,
}

impl LeaderSimulation {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl LeaderDriver {
    pub fn simulation() -> Self {
        LeaderDriver::Simulation(LeaderSimulation::new())
    }

    pub fn open(&mut self) -> HorusResult<()> {
        match self {
            LeaderDriver::Simulation(_) => Ok(()),
            #[cfg(feature = "serial-hardware")]
            LeaderDriver::SerialZhonglin(s) => s.open(),
        }
    }

    /// Walks a slow sinusoid per joint when simulated; reads the real bus otherwise.
    pub fn read_positions(&mut self) -> HorusResult<JointVector> {
        match self {
            LeaderDriver::Simulation(sim) => {
                let t = sim.start.elapsed().as_secs_f64();
                let values = (0..NUM_JOINTS)
                    .map(|i| 0.3 * (t * 0.2 + i as f64).sin())
                    .collect();
                Ok(JointVector::new(JointUnit::Radians, values))
            }
            #[cfg(feature = "serial-hardware")]
            LeaderDriver::SerialZhonglin(s) => s.read_positions(),
        }
    }

    pub fn close(&mut self) -> HorusResult<()> {
        match self {
            LeaderDriver::Simulation(_) => Ok(()),
            #[cfg(feature = "serial-hardware")]
            LeaderDriver::SerialZhonglin(s) => s.close(),
        }
    }
}

/// The follower arm adapter: accepts integer milli-degree commands and
/// reports its current position in the same unit (§4.D contract).
pub enum FollowerDriver {
    Simulation(FollowerSimulation),
    #[cfg(feature = "serial-hardware")]
    PiperCan(SerialFollower),
}

pub struct FollowerSimulation {
    current: Vec<i32>,
}

impl FollowerSimulation {
    pub fn new() -> Self {
        Self {
            current: vec![0; NUM_JOINTS],
        }
    }
}

impl FollowerDriver {
    pub fn simulation() -> Self {
        FollowerDriver::Simulation(FollowerSimulation::new())
    }

    pub fn open(&mut self) -> HorusResult<()> {
        match self {
            FollowerDriver::Simulation(_) => Ok(()),
            #[cfg(feature = "serial-hardware")]
            FollowerDriver::PiperCan(s) => s.open(),
        }
    }

    /// Simulation just reports whatever it was last commanded (§4.A).
    pub fn read_positions(&mut self) -> HorusResult<Vec<i32>> {
        match self {
            FollowerDriver::Simulation(sim) => Ok(sim.current.clone()),
            #[cfg(feature = "serial-hardware")]
            FollowerDriver::PiperCan(s) => s.read_positions(),
        }
    }

    pub fn write_positions(&mut self, targets: &[i32]) -> HorusResult<()> {
        match self {
            FollowerDriver::Simulation(sim) => {
                sim.current = targets.to_vec();
                Ok(())
            }
            #[cfg(feature = "serial-hardware")]
            FollowerDriver::PiperCan(s) => s.write_positions(targets),
        }
    }

    pub fn close(&mut self) -> HorusResult<()> {
        match self {
            FollowerDriver::Simulation(_) => Ok(()),
            #[cfg(feature = "serial-hardware")]
            FollowerDriver::PiperCan(s) => s.close(),
        }
    }
}

/// A camera adapter: produces H x W x 3 uint8 frames (§4.A).
pub enum CameraDriver {
    Simulation(CameraSimulation),
    #[cfg(feature = "serial-hardware")]
    OpenCv(OpenCvCamera),
}

pub struct CameraSimulation {
    width: u32,
    height: u32,
    start: Instant,
}

impl CameraSimulation {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            start: Instant::now(),
        }
    }
}

impl CameraDriver {
    pub fn simulation(width: u32, height: u32) -> Self {
        CameraDriver::Simulation(CameraSimulation::new(width, height))
    }

    pub fn open(&mut self) -> HorusResult<()> {
        match self {
            CameraDriver::Simulation(_) => Ok(()),
            #[cfg(feature = "serial-hardware")]
            CameraDriver::OpenCv(c) => c.open(),
        }
    }

    /// Renders a synthetic moving gradient when simulated.
    pub fn capture(&mut self) -> HorusResult<crate::frame::ImageSample> {
        match self {
            CameraDriver::Simulation(sim) => {
                let phase = (sim.start.elapsed().as_millis() / 33) as u8;
                let mut rgb = vec![0u8; sim.width as usize * sim.height as usize * 3];
                for y in 0..sim.height {
                    for x in 0..sim.width {
                        let idx = (y * sim.width + x) as usize * 3;
                        rgb[idx] = x.wrapping_add(phase as u32) as u8;
                        rgb[idx + 1] = y.wrapping_add(phase as u32) as u8;
                        rgb[idx + 2] = phase;
                    }
                }
                Ok(crate::frame::ImageSample::new(sim.width, sim.height, rgb))
            }
            #[cfg(feature = "serial-hardware")]
            CameraDriver::OpenCv(c) => c.capture(),
        }
    }

    pub fn close(&mut self) -> HorusResult<()> {
        match self {
            CameraDriver::Simulation(_) => Ok(()),
            #[cfg(feature = "serial-hardware")]
            CameraDriver::OpenCv(c) => c.close(),
        }
    }
}

#[cfg(feature = "serial-hardware")]
pub struct SerialLeader {
    port_path: String,
    port: Option<Box<dyn serialport::SerialPort>>,
}

#[cfg(feature = "serial-hardware")]
impl SerialLeader {
    pub fn new(port_path: impl Into<String>) -> Self {
        Self {
            port_path: port_path.into(),
            port: None,
        }
    }

    fn open(&mut self) -> HorusResult<()> {
        let port = serialport::new(&self.port_path, 1_000_000)
            .timeout(std::time::Duration::from_millis(50))
            .open()
            .map_err(|e| HorusError::NodeStartupFailure {
                node: "leader".to_string(),
                message: format!("opening '{}': {}", self.port_path, e),
            })?;
        self.port = Some(port);
        Ok(())
    }

    fn read_positions(&mut self) -> HorusResult<JointVector> {
        // The wire protocol (serial framing, register decoding) is an
        // out-of-scope motor driver concern (§1); this path only exists to
        // demonstrate where a real driver plugs in.
        Err(HorusError::PositionReadFailure {
            bus: "leader".to_string(),
            message: "real serial leader protocol not implemented in this core".to_string(),
        })
    }

    fn close(&mut self) -> HorusResult<()> {
        self.port = None;
        Ok(())
    }
}

#[cfg(feature = "serial-hardware")]
pub struct SerialFollower {
    port_path: String,
    port: Option<Box<dyn serialport::SerialPort>>,
}

#[cfg(feature = "serial-hardware")]
impl SerialFollower {
    pub fn new(port_path: impl Into<String>) -> Self {
        Self {
            port_path: port_path.into(),
            port: None,
        }
    }

    fn open(&mut self) -> HorusResult<()> {
        let port = serialport::new(&self.port_path, 1_000_000)
            .timeout(std::time::Duration::from_millis(50))
            .open()
            .map_err(|e| HorusError::NodeStartupFailure {
                node: "follower".to_string(),
                message: format!("opening '{}': {}", self.port_path, e),
            })?;
        self.port = Some(port);
        Ok(())
    }

    fn read_positions(&mut self) -> HorusResult<Vec<i32>> {
        Err(HorusError::PositionReadFailure {
            bus: "follower".to_string(),
            message: "real CAN follower protocol not implemented in this core".to_string(),
        })
    }

    fn write_positions(&mut self, _targets: &[i32]) -> HorusResult<()> {
        Ok(())
    }

    fn close(&mut self) -> HorusResult<()> {
        self.port = None;
        Ok(())
    }
}

#[cfg(feature = "serial-hardware")]
pub struct OpenCvCamera {
    device_path: String,
}

#[cfg(feature = "serial-hardware")]
impl OpenCvCamera {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }

    fn open(&mut self) -> HorusResult<()> {
        if !std::path::Path::new(&self.device_path).exists() {
            return Err(HorusError::NodeStartupFailure {
                node: "camera".to_string(),
                message: format!("device '{}' not found", self.device_path),
            });
        }
        Ok(())
    }

    fn capture(&mut self) -> HorusResult<crate::frame::ImageSample> {
        Err(HorusError::Internal(
            "real camera capture path not implemented in this core".to_string(),
        ))
    }

    fn close(&mut self) -> HorusResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leader_simulation_emits_bounded_radians() {
        let mut leader = LeaderDriver::simulation();
        leader.open().unwrap();
        let reading = leader.read_positions().unwrap();
        assert_eq!(reading.unit, JointUnit::Radians);
        for v in reading.values {
            assert!(v.abs() <= 0.31);
        }
    }

    #[test]
    fn follower_simulation_tracks_last_command() {
        let mut follower = FollowerDriver::simulation();
        follower.open().unwrap();
        follower.write_positions(&[100, 200, 300, 0, 0, 0]).unwrap();
        assert_eq!(
            follower.read_positions().unwrap(),
            vec![100, 200, 300, 0, 0, 0]
        );
    }

    #[test]
    fn camera_simulation_produces_correctly_sized_frame() {
        let mut camera = CameraDriver::simulation(64, 32);
        camera.open().unwrap();
        let frame = camera.capture().unwrap();
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 32);
        assert_eq!(frame.rgb.len(), 64 * 32 * 3);
    }
}
