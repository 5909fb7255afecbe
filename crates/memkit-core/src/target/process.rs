//! Live Windows process backend.
//!
//! Opens a process with full access, snapshots its module list once, and
//! implements [`TargetMemory`] over the Win32 virtual-memory APIs. Also
//! carries the process-level extras that sit outside the trait: DLL
//! injection and whole-process suspend/resume.

use std::ffi::c_void;

use tracing::{debug, info, warn};

use windows::Win32::Foundation::{BOOL, CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, Module32NextW, PROCESSENTRY32W,
    Process32FirstW, Process32NextW, TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32, TH32CS_SNAPPROCESS,
    TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First, Thread32Next,
};
use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_FREE, MEM_RESERVE, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE_READWRITE,
    PAGE_PROTECTION_FLAGS, PAGE_READWRITE, VirtualAllocEx, VirtualProtectEx, VirtualQueryEx,
};
use windows::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
use windows::Win32::System::Threading::{
    CreateRemoteThread, IsWow64Process, OpenProcess, OpenThread, PROCESS_ALL_ACCESS, ResumeThread,
    SuspendThread, THREAD_SUSPEND_RESUME, WaitForSingleObject,
};
use windows::core::s;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::target::{AddressSpace, Bitness, Protection, Region, TargetMemory};

/// A module loaded in the target at open time.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    pub base: Address,
    pub size: u64,
}

pub struct ProcessTarget {
    pid: u32,
    handle: HANDLE,
    bitness: Bitness,
    main_module: Address,
    modules: Vec<ModuleInfo>,
    space: AddressSpace,
}

// The handle is only used through APIs that are safe to call from any thread.
unsafe impl Send for ProcessTarget {}
unsafe impl Sync for ProcessTarget {}

impl ProcessTarget {
    /// Open a process by ID with full access.
    pub fn open(pid: u32) -> Result<Self> {
        // SAFETY: OpenProcess returns an owned handle; closed in Drop.
        let handle = unsafe { OpenProcess(PROCESS_ALL_ACCESS, false, pid) }
            .map_err(|e| Error::ProcessOpenFailed(format!("pid {pid}: {e}")))?;

        let mut wow64 = BOOL::default();
        // SAFETY: handle is a valid process handle.
        unsafe { IsWow64Process(handle, &mut wow64) }
            .map_err(|e| Error::ProcessOpenFailed(format!("IsWow64Process: {e}")))?;
        let bitness = if wow64.as_bool() {
            Bitness::Bits32
        } else {
            Bitness::Bits64
        };

        let modules = snapshot_modules(pid)?;
        let main_module = modules
            .first()
            .map(|m| m.base)
            .ok_or_else(|| Error::ProcessOpenFailed(format!("pid {pid} has no modules")))?;

        let mut info = SYSTEM_INFO::default();
        // SAFETY: GetSystemInfo fills the provided struct.
        unsafe { GetSystemInfo(&mut info) };
        let space = AddressSpace {
            min_address: info.lpMinimumApplicationAddress as u64,
            max_address: info.lpMaximumApplicationAddress as u64,
            allocation_granularity: u64::from(info.dwAllocationGranularity),
        };

        info!(pid, %bitness, modules = modules.len(), "opened target process");
        Ok(ProcessTarget {
            pid,
            handle,
            bitness,
            main_module,
            modules,
            space,
        })
    }

    /// Open a process by executable name, matched case-insensitively with
    /// `.exe`/`.bin` suffixes ignored.
    pub fn open_by_name(name: &str) -> Result<Self> {
        let pid = find_pid(name)?;
        Self::open(pid)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn modules(&self) -> &[ModuleInfo] {
        &self.modules
    }

    /// Load a DLL into the target by spawning a remote `LoadLibraryA` thread.
    pub fn inject_dll(&self, dll_path: &str) -> Result<()> {
        let mut path: Vec<u8> = dll_path.bytes().collect();
        path.push(0);

        // SAFETY: allocating fresh committed memory in the target.
        let remote = unsafe {
            VirtualAllocEx(
                self.handle,
                None,
                path.len(),
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if remote.is_null() {
            return Err(Error::InjectionFailed("allocation for path failed".into()));
        }
        self.write_raw(Address::new(remote as u64), &path)?;

        // SAFETY: kernel32 is always loaded and exports LoadLibraryA.
        let loader = unsafe {
            let kernel32 = GetModuleHandleA(s!("kernel32.dll"))
                .map_err(|e| Error::InjectionFailed(format!("GetModuleHandleA: {e}")))?;
            GetProcAddress(kernel32, s!("LoadLibraryA"))
        }
        .ok_or_else(|| Error::InjectionFailed("LoadLibraryA not found".into()))?;

        // SAFETY: LoadLibraryA has the LPTHREAD_START_ROUTINE shape (one
        // pointer argument, u32 return); the parameter points at the
        // NUL-terminated path written above.
        let thread = unsafe {
            let start = std::mem::transmute::<
                _,
                unsafe extern "system" fn(*mut c_void) -> u32,
            >(loader);
            CreateRemoteThread(self.handle, None, 0, Some(start), Some(remote), 0, None)
        }
        .map_err(|e| Error::InjectionFailed(format!("CreateRemoteThread: {e}")))?;

        // SAFETY: thread is a valid handle from CreateRemoteThread.
        unsafe {
            if WaitForSingleObject(thread, 10_000) != WAIT_OBJECT_0 {
                let _ = CloseHandle(thread);
                return Err(Error::InjectionFailed("loader thread timed out".into()));
            }
            let _ = CloseHandle(thread);
        }
        info!(pid = self.pid, dll = dll_path, "injected dll");
        Ok(())
    }

    /// Suspend every thread owned by the target.
    pub fn suspend(&self) -> Result<()> {
        self.for_each_thread(|thread| {
            // SAFETY: thread is a valid handle with suspend rights.
            unsafe { SuspendThread(thread) };
        })
    }

    /// Resume every thread, draining nested suspend counts.
    pub fn resume(&self) -> Result<()> {
        self.for_each_thread(|thread| {
            // SAFETY: thread is a valid handle with suspend rights.
            unsafe {
                while !resume_drained(ResumeThread(thread)) {}
            }
        })
    }

    fn for_each_thread(&self, f: impl Fn(HANDLE)) -> Result<()> {
        // SAFETY: the snapshot handle is closed before returning.
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0)
                .map_err(|e| Error::ProcessOpenFailed(format!("thread snapshot: {e}")))?;

            let mut entry = THREADENTRY32 {
                dwSize: std::mem::size_of::<THREADENTRY32>() as u32,
                ..Default::default()
            };
            if Thread32First(snapshot, &mut entry).is_ok() {
                loop {
                    if entry.th32OwnerProcessID == self.pid {
                        if let Ok(thread) =
                            OpenThread(THREAD_SUSPEND_RESUME, false, entry.th32ThreadID)
                        {
                            f(thread);
                            let _ = CloseHandle(thread);
                        }
                    }
                    if Thread32Next(snapshot, &mut entry).is_err() {
                        break;
                    }
                }
            }
            let _ = CloseHandle(snapshot);
        }
        Ok(())
    }
}

impl TargetMemory for ProcessTarget {
    fn bitness(&self) -> Bitness {
        self.bitness
    }

    fn main_module_base(&self) -> Address {
        self.main_module
    }

    fn module_base(&self, name: &str) -> Option<Address> {
        self.modules
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .map(|m| m.base)
    }

    fn read_raw(&self, address: Address, buf: &mut [u8]) -> Result<()> {
        let mut read = 0usize;
        // SAFETY: buf is a valid writable buffer of buf.len() bytes.
        unsafe {
            ReadProcessMemory(
                self.handle,
                address.get() as *const c_void,
                buf.as_mut_ptr().cast(),
                buf.len(),
                Some(&mut read),
            )
        }
        .map_err(|e| Error::MemoryReadFailed {
            address: address.get(),
            message: e.to_string(),
        })?;
        if read != buf.len() {
            return Err(Error::MemoryReadFailed {
                address: address.get(),
                message: format!("short read: {read} of {} bytes", buf.len()),
            });
        }
        Ok(())
    }

    fn write_raw(&self, address: Address, bytes: &[u8]) -> Result<()> {
        let mut written = 0usize;
        // SAFETY: bytes is a valid readable buffer of bytes.len() bytes.
        unsafe {
            WriteProcessMemory(
                self.handle,
                address.get() as *const c_void,
                bytes.as_ptr().cast(),
                bytes.len(),
                Some(&mut written),
            )
        }
        .map_err(|e| Error::MemoryWriteFailed {
            address: address.get(),
            message: e.to_string(),
        })?;
        if written != bytes.len() {
            return Err(Error::MemoryWriteFailed {
                address: address.get(),
                message: format!("short write: {written} of {} bytes", bytes.len()),
            });
        }
        Ok(())
    }

    fn change_protection(
        &self,
        address: Address,
        len: usize,
        protection: Protection,
    ) -> Result<Protection> {
        let mut old = PAGE_PROTECTION_FLAGS::default();
        // SAFETY: operating on the owned process handle.
        unsafe {
            VirtualProtectEx(
                self.handle,
                address.get() as *const c_void,
                len,
                PAGE_PROTECTION_FLAGS(protection.0),
                &mut old,
            )
        }
        .map_err(|e| Error::ProtectionChangeFailed {
            address: address.get(),
            message: e.to_string(),
        })?;
        Ok(Protection(old.0))
    }

    fn allocate(&self, preferred: Address, size: usize) -> Result<Address> {
        let hint = if preferred.is_null() {
            None
        } else {
            Some(preferred.get() as *const c_void)
        };
        // SAFETY: allocating fresh committed memory in the target.
        let granted = unsafe {
            VirtualAllocEx(
                self.handle,
                hint,
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_EXECUTE_READWRITE,
            )
        };
        if granted.is_null() {
            debug!(preferred = %preferred, size, "VirtualAllocEx returned null");
            return Err(Error::AllocationFailed {
                preferred: preferred.get(),
                size,
            });
        }
        Ok(Address::new(granted as u64))
    }

    fn query_region(&self, address: Address) -> Option<Region> {
        let mut info = MEMORY_BASIC_INFORMATION::default();
        // SAFETY: VirtualQueryEx fills the provided struct; a zero return
        // means the address is past the queryable range.
        let len = unsafe {
            VirtualQueryEx(
                self.handle,
                Some(address.get() as *const c_void),
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if len == 0 {
            return None;
        }
        Some(Region {
            base: Address::new(info.BaseAddress as u64),
            size: info.RegionSize as u64,
            free: info.State == MEM_FREE,
        })
    }

    fn layout(&self) -> AddressSpace {
        self.space
    }
}

impl Drop for ProcessTarget {
    fn drop(&mut self) {
        // SAFETY: handle came from OpenProcess and is closed exactly once.
        if let Err(e) = unsafe { CloseHandle(self.handle) } {
            warn!(pid = self.pid, "failed to close process handle: {e}");
        }
    }
}

fn snapshot_modules(pid: u32) -> Result<Vec<ModuleInfo>> {
    let mut modules = Vec::new();
    // SAFETY: the snapshot handle is closed before returning.
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid)
            .map_err(|e| Error::ProcessOpenFailed(format!("module snapshot: {e}")))?;

        let mut entry = MODULEENTRY32W {
            dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
            ..Default::default()
        };
        if Module32FirstW(snapshot, &mut entry).is_ok() {
            loop {
                modules.push(ModuleInfo {
                    name: utf16_name(&entry.szModule),
                    base: Address::new(entry.modBaseAddr as u64),
                    size: u64::from(entry.modBaseSize),
                });
                if Module32NextW(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }
        let _ = CloseHandle(snapshot);
    }
    Ok(modules)
}

/// First process whose executable matches `name`, compared without
/// `.exe`/`.bin` suffixes and ignoring case.
fn find_pid(name: &str) -> Result<u32> {
    let wanted = strip_exe_suffix(name);
    // SAFETY: the snapshot handle is closed before returning.
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0)
            .map_err(|e| Error::ProcessOpenFailed(format!("process snapshot: {e}")))?;

        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };
        if Process32FirstW(snapshot, &mut entry).is_ok() {
            loop {
                let exe = utf16_name(&entry.szExeFile);
                if strip_exe_suffix(&exe).eq_ignore_ascii_case(wanted) {
                    let pid = entry.th32ProcessID;
                    let _ = CloseHandle(snapshot);
                    return Ok(pid);
                }
                if Process32NextW(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }
        let _ = CloseHandle(snapshot);
    }
    Err(Error::ProcessNotFound(name.to_string()))
}

/// `ResumeThread` returns the previous suspend count, or `u32::MAX` on
/// failure (the thread may exit between the snapshot and the call). Draining
/// stops at a count of 0 or 1, and on failure.
fn resume_drained(previous_count: u32) -> bool {
    previous_count <= 1 || previous_count == u32::MAX
}

fn strip_exe_suffix(name: &str) -> &str {
    // Byte-wise comparison: process names are not guaranteed ASCII, and a
    // str slice at an arbitrary tail offset could split a multibyte char.
    let bytes = name.as_bytes();
    for suffix in [".exe", ".bin"] {
        if bytes.len() > suffix.len() {
            let at = bytes.len() - suffix.len();
            if bytes[at..].eq_ignore_ascii_case(suffix.as_bytes()) {
                // The matched suffix is ASCII, so `at` is a char boundary.
                return &name[..at];
            }
        }
    }
    name
}

fn utf16_name(raw: &[u16]) -> String {
    let len = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf16_lossy(&raw[..len])
}
