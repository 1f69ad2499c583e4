//! SOEM-backed master stack.
//!
//! Talks to the Simple Open EtherCAT Master (SOEM) C library through the
//! `SOEM-sys` FFI bindings. The master owns every buffer the SOEM context
//! points into and keeps one context alive from `bind` to `close`.
//!
//! # Requirements
//!
//! - Linux with raw socket capabilities (CAP_NET_RAW) or root privileges
//! - A C toolchain and CMake (SOEM is built from source by `SOEM-sys`)

#![allow(unsafe_code)]

use crate::master::{MasterStack, StateTarget};
use crate::sii::SiiField;
use crate::slave::{SlaveHandle, SlaveIdentity};
use ecboot_common::error::{FieldbusError, FieldbusResult};
use ecboot_common::state::{AlStatus, ApplicationState};
use soem_sys::{
    boolean, ec_PDOassignt, ec_PDOdesct, ec_SMcommtypet, ec_eepromFMMUt, ec_eepromSMt, ec_eringt,
    ec_group, ec_idxstackT, ec_slave, ecx_FPRD, ecx_FPWR, ecx_close, ecx_config_init, ecx_context,
    ecx_init, ecx_portt, ecx_readeeprom, ecx_statecheck, ecx_writestate,
};
use std::ffi::{c_int, CStr, CString};
use std::fs;
use std::mem;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of slaves supported.
const MAX_SLAVES: usize = 128;

/// Maximum number of groups.
const MAX_GROUPS: usize = 2;

/// Size of the SOEM EEPROM bitmap cache.
const EEP_BITMAP_SIZE: usize = 128;

/// Size of the SOEM EEPROM cache buffer.
const EEP_BUF_SIZE: usize = EEP_BITMAP_SIZE << 5;

/// Linux capability bit for CAP_NET_RAW.
const CAP_NET_RAW_BIT: u32 = 13;

/// A zero-initialised SOEM structure.
///
/// # Safety
///
/// `T` must be a plain C struct for which all-zero bytes are a valid value.
/// SOEM declares these buffers as zero-initialised globals in its own
/// single-context mode.
unsafe fn zeroed<T>() -> T {
    mem::zeroed()
}

/// Memory the SOEM context points into. Every buffer is heap allocated and
/// never resized, so the addresses stored in the context stay valid for
/// as long as the buffers live.
struct SoemBuffers {
    port: Box<ecx_portt>,
    /// Slot 0 is the master's aggregate; slaves start at index 1.
    slaves: Vec<ec_slave>,
    slave_count: Box<c_int>,
    groups: Vec<ec_group>,
    esibuf: Box<[u8; EEP_BUF_SIZE]>,
    esimap: Box<[u32; EEP_BITMAP_SIZE]>,
    elist: Box<ec_eringt>,
    idxstack: Box<ec_idxstackT>,
    ecaterror: Box<boolean>,
    dc_time: Box<i64>,
    sm_commtype: Box<ec_SMcommtypet>,
    pdo_assign: Box<ec_PDOassignt>,
    pdo_desc: Box<ec_PDOdesct>,
    eep_sm: Box<ec_eepromSMt>,
    eep_fmmu: Box<ec_eepromFMMUt>,
}

impl SoemBuffers {
    fn new() -> Self {
        // SAFETY: all of these are plain C structs or integer arrays.
        unsafe {
            Self {
                port: Box::new(zeroed()),
                slaves: (0..=MAX_SLAVES).map(|_| zeroed()).collect(),
                slave_count: Box::new(0),
                groups: (0..MAX_GROUPS).map(|_| zeroed()).collect(),
                esibuf: Box::new([0; EEP_BUF_SIZE]),
                esimap: Box::new([0; EEP_BITMAP_SIZE]),
                elist: Box::new(zeroed()),
                idxstack: Box::new(zeroed()),
                ecaterror: Box::new(0),
                dc_time: Box::new(0),
                sm_commtype: Box::new(zeroed()),
                pdo_assign: Box::new(zeroed()),
                pdo_desc: Box::new(zeroed()),
                eep_sm: Box::new(zeroed()),
                eep_fmmu: Box::new(zeroed()),
            }
        }
    }

    /// Build a context referencing these buffers.
    fn context(&mut self) -> ecx_context {
        ecx_context {
            port: &mut *self.port,
            slavelist: self.slaves.as_mut_ptr(),
            slavecount: &mut *self.slave_count,
            maxslave: c_int::try_from(self.slaves.len()).unwrap_or(c_int::MAX),
            grouplist: self.groups.as_mut_ptr(),
            maxgroup: c_int::try_from(self.groups.len()).unwrap_or(c_int::MAX),
            esibuf: self.esibuf.as_mut_ptr(),
            esimap: self.esimap.as_mut_ptr(),
            esislave: Default::default(),
            elist: &mut *self.elist,
            idxstack: &mut *self.idxstack,
            ecaterror: &mut *self.ecaterror,
            DCtO: Default::default(),
            DCl: Default::default(),
            DCtime: &mut *self.dc_time,
            SMcommtype: &mut *self.sm_commtype,
            PDOassign: &mut *self.pdo_assign,
            PDOdesc: &mut *self.pdo_desc,
            eepSM: &mut *self.eep_sm,
            eepFMMU: &mut *self.eep_fmmu,
            FOEhook: Default::default(),
            EOEhook: Default::default(),
            manualstatechange: Default::default(),
        }
    }

    /// Number of slaves found by the last configuration pass.
    fn slave_count(&self) -> u16 {
        u16::try_from(*self.slave_count)
            .unwrap_or(0)
            .min(u16::try_from(MAX_SLAVES).unwrap_or(u16::MAX))
    }
}

/// SOEM-based master stack.
pub struct SoemMaster {
    interface: Option<String>,
    buffers: SoemBuffers,
    /// Live SOEM context; `Some` between a successful `bind` and `close`.
    context: Option<Box<ecx_context>>,
}

// SAFETY: the raw pointers inside the context only reference `buffers`,
// which this value owns. Nothing is shared with other threads, and every
// access goes through `&mut self`.
unsafe impl Send for SoemMaster {}

impl Default for SoemMaster {
    fn default() -> Self {
        Self::new()
    }
}

impl SoemMaster {
    /// Create an unbound master.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interface: None,
            buffers: SoemBuffers::new(),
            context: None,
        }
    }

    fn check_interface_exists(interface: &str) -> Result<(), String> {
        let path = format!("/sys/class/net/{interface}");
        if !Path::new(&path).exists() {
            return Err(format!("interface not found (expected {path})"));
        }
        Ok(())
    }

    fn has_cap_net_raw() -> bool {
        let Ok(status) = fs::read_to_string("/proc/self/status") else {
            return false;
        };

        for line in status.lines() {
            if let Some(value) = line.strip_prefix("CapEff:\t") {
                if let Ok(bits) = u64::from_str_radix(value.trim(), 16) {
                    return (bits & (1u64 << CAP_NET_RAW_BIT)) != 0;
                }
                break;
            }
        }
        false
    }

    fn check_raw_socket_privilege() -> Result<(), String> {
        let is_root = unsafe { libc::geteuid() == 0 };
        if is_root || Self::has_cap_net_raw() {
            return Ok(());
        }
        Err("raw sockets require CAP_NET_RAW or root".into())
    }

    fn context_ptr(&mut self) -> FieldbusResult<*mut ecx_context> {
        self.context
            .as_deref_mut()
            .map(|context| context as *mut ecx_context)
            .ok_or(FieldbusError::NotBound)
    }

    /// Ensure `position` names a discovered slave.
    fn check_position(&self, position: u16) -> Result<(), String> {
        if position == 0 || position > self.buffers.slave_count() {
            return Err(format!(
                "slave {position} not in 1..={}",
                self.buffers.slave_count()
            ));
        }
        Ok(())
    }

    fn timeout_us(timeout: Duration) -> c_int {
        c_int::try_from(timeout.as_micros()).unwrap_or(c_int::MAX)
    }

    fn handle(&self, position: u16) -> SlaveHandle {
        let slave = &self.buffers.slaves[usize::from(position)];
        // SAFETY: SOEM NUL-terminates the name; a zeroed slot is an empty string.
        let name = unsafe { CStr::from_ptr(slave.name.as_ptr()) }.to_string_lossy();
        let (sm0, sm1) = (slave.SM[0], slave.SM[1]);
        SlaveHandle::new(position, slave.configadr)
            .with_name(name)
            .with_identity(SlaveIdentity::new(
                slave.eep_man,
                slave.eep_id,
                slave.eep_rev,
                0,
            ))
            .with_mailbox_sm_flags(sm0.SMflags, sm1.SMflags)
    }
}

impl MasterStack for SoemMaster {
    fn bind(&mut self, interface: &str) -> FieldbusResult<()> {
        let unavailable = |reason: String| FieldbusError::TransportUnavailable {
            interface: interface.to_string(),
            reason,
        };
        if interface.is_empty() {
            return Err(unavailable("interface name cannot be empty".into()));
        }
        Self::check_interface_exists(interface).map_err(unavailable)?;
        Self::check_raw_socket_privilege().map_err(unavailable)?;
        let name = CString::new(interface).map_err(|e| unavailable(e.to_string()))?;

        if self.context.is_some() {
            self.close()?;
        }

        let mut context = Box::new(self.buffers.context());
        // SAFETY: the context references buffers owned by `self` that outlive it.
        let ret = unsafe { ecx_init(&mut *context, name.as_ptr()) };
        if ret <= 0 {
            return Err(unavailable(std::io::Error::last_os_error().to_string()));
        }

        self.context = Some(context);
        self.interface = Some(interface.to_string());
        info!(interface, "SOEM context initialized");
        Ok(())
    }

    fn discover_and_configure(&mut self) -> FieldbusResult<Vec<SlaveHandle>> {
        let context = self.context_ptr()?;
        // SAFETY: `context` is live and exclusively borrowed through `&mut self`.
        let ret = unsafe { ecx_config_init(context, 0) };
        if ret < 0 {
            return Err(FieldbusError::Discovery(format!(
                "ecx_config_init returned {ret}"
            )));
        }

        let handles = (1..=self.buffers.slave_count())
            .map(|position| self.handle(position))
            .collect::<Vec<_>>();

        debug!(count = handles.len(), "SOEM discovery complete");
        Ok(handles)
    }

    fn poll_state(
        &mut self,
        target: StateTarget,
        state: ApplicationState,
        timeout: Duration,
    ) -> FieldbusResult<AlStatus> {
        let slave = match target {
            StateTarget::All => 0,
            StateTarget::Slave(position) => position,
        };
        let context = self.context_ptr()?;
        // SAFETY: as above; SOEM returns 0 for positions beyond the slave count.
        let raw = unsafe {
            ecx_statecheck(
                context,
                slave,
                u16::from(state.al_code()),
                Self::timeout_us(timeout),
            )
        };
        let [al_status, _] = raw.to_le_bytes();
        Ok(AlStatus::from_raw(al_status))
    }

    fn request_state(
        &mut self,
        slave: &SlaveHandle,
        state: ApplicationState,
    ) -> FieldbusResult<()> {
        let position = slave.position;
        let rejected = |reason: String| FieldbusError::StateRequest {
            slave: position,
            state,
            reason,
        };
        let context = self.context_ptr()?;
        self.check_position(position).map_err(rejected)?;

        self.buffers.slaves[usize::from(position)].state = u16::from(state.al_code());
        // SAFETY: as above; `position` is within the slave list.
        let wkc = unsafe { ecx_writestate(context, position) };
        if wkc <= 0 {
            return Err(rejected(format!("AL control write returned {wkc}")));
        }
        Ok(())
    }

    fn read_sii(
        &mut self,
        slave: &SlaveHandle,
        field: SiiField,
        timeout: Duration,
    ) -> FieldbusResult<u32> {
        let word = field.word_address();
        let context = self.context_ptr()?;
        self.check_position(slave.position)
            .map_err(|reason| FieldbusError::SiiRead {
                slave: slave.position,
                word,
                reason,
            })?;

        // SAFETY: as above; `position` is within the slave list.
        let raw = unsafe { ecx_readeeprom(context, slave.position, word, Self::timeout_us(timeout)) };
        debug!(slave = slave.position, %field, raw = %format!("{raw:#010x}"), "SII read");
        Ok(raw)
    }

    fn write_register(
        &mut self,
        configured_address: u16,
        register: u16,
        data: &[u8],
        timeout: Duration,
    ) -> FieldbusResult<()> {
        let failed = |reason: String| FieldbusError::RegisterWrite {
            station: configured_address,
            register,
            reason,
        };
        self.context_ptr()?;
        let length = u16::try_from(data.len()).map_err(|e| failed(e.to_string()))?;
        let mut buffer = data.to_vec();

        // SAFETY: the port is live while bound; `buffer` holds `length` bytes.
        let wkc = unsafe {
            ecx_FPWR(
                &mut *self.buffers.port,
                configured_address,
                register,
                length,
                buffer.as_mut_ptr().cast(),
                Self::timeout_us(timeout),
            )
        };
        if wkc <= 0 {
            return Err(failed(format!("working counter {wkc}")));
        }
        Ok(())
    }

    fn read_register(
        &mut self,
        configured_address: u16,
        register: u16,
        len: usize,
        timeout: Duration,
    ) -> FieldbusResult<Vec<u8>> {
        let failed = |reason: String| FieldbusError::RegisterRead {
            station: configured_address,
            register,
            reason,
        };
        self.context_ptr()?;
        let length = u16::try_from(len).map_err(|e| failed(e.to_string()))?;
        let mut buffer = vec![0u8; len];

        // SAFETY: the port is live while bound; `buffer` holds `length` bytes.
        let wkc = unsafe {
            ecx_FPRD(
                &mut *self.buffers.port,
                configured_address,
                register,
                length,
                buffer.as_mut_ptr().cast(),
                Self::timeout_us(timeout),
            )
        };
        if wkc <= 0 {
            return Err(failed(format!("working counter {wkc}")));
        }
        Ok(buffer)
    }

    fn close(&mut self) -> FieldbusResult<()> {
        match self.context.take() {
            Some(mut context) => {
                // SAFETY: the context was initialised by `ecx_init` and is closed once.
                unsafe { ecx_close(&mut *context) };
                *self.buffers.slave_count = 0;
                info!(interface = ?self.interface.take(), "Closing SOEM transport");
            }
            None => warn!("Close requested on unbound SOEM transport"),
        }
        Ok(())
    }
}

impl Drop for SoemMaster {
    fn drop(&mut self) {
        if self.context.is_some() {
            let _ = self.close();
        }
    }
}

impl std::fmt::Debug for SoemMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoemMaster")
            .field("interface", &self.interface)
            .field("slave_count", &self.buffers.slave_count())
            .finish_non_exhaustive()
    }
}
