//! Native key store over the Win32 registry API.
//!
//! Remote machines are reached through `RegConnectRegistryW`, which needs the
//! Remote Registry service on the target.

use log::debug;
use std::io;
use std::iter;
use std::ptr;
use windows_sys::Win32::Foundation::{
    ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA, ERROR_NO_MORE_ITEMS,
    ERROR_SUCCESS, WIN32_ERROR,
};
use windows_sys::Win32::System::Registry::{
    HKEY, HKEY_CLASSES_ROOT, HKEY_CURRENT_CONFIG, HKEY_CURRENT_USER, HKEY_DYN_DATA,
    HKEY_LOCAL_MACHINE, HKEY_PERFORMANCE_DATA, HKEY_USERS, KEY_READ, RegCloseKey,
    RegConnectRegistryW, RegEnumKeyExW, RegOpenKeyExW, RegQueryInfoKeyW,
};

use crate::domain::{
    Connection, Hive, Provider, RegistryKey, StoreError, local_machine_name, same_key_name,
};

/// Key names are at most 255 UTF-16 units, plus the terminator.
const NAME_BUFFER_UNITS: usize = 256;

/// NUL-terminated UTF-16 copy of `text`.
fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(iter::once(0)).collect()
}

/// Predefined root handle of `hive`.
fn predefined(hive: Hive) -> HKEY {
    match hive {
        Hive::ClassesRoot => HKEY_CLASSES_ROOT,
        Hive::CurrentUser => HKEY_CURRENT_USER,
        Hive::LocalMachine => HKEY_LOCAL_MACHINE,
        Hive::Users => HKEY_USERS,
        Hive::PerformanceData => HKEY_PERFORMANCE_DATA,
        Hive::CurrentConfig => HKEY_CURRENT_CONFIG,
        Hive::DynData => HKEY_DYN_DATA,
    }
}

/// Whether `host` names this machine, so no remote session is needed.
fn is_local(host: &str) -> bool {
    host.is_empty()
        || host == "."
        || host.eq_ignore_ascii_case("localhost")
        || same_key_name(host, &local_machine_name())
}

/// Map a Win32 status code to a store error.
fn store_error(code: WIN32_ERROR) -> StoreError {
    match code {
        ERROR_FILE_NOT_FOUND => StoreError::NotFound,
        ERROR_ACCESS_DENIED => StoreError::AccessDenied,
        other => StoreError::unavailable(
            i32::try_from(other).map_or_else(
                |_| format!("registry call failed with status {other}"),
                |raw| io::Error::from_raw_os_error(raw).to_string(),
            ),
        ),
    }
}

/// `Ok` for `ERROR_SUCCESS`, the mapped error otherwise.
fn check(code: WIN32_ERROR) -> Result<(), StoreError> {
    if code == ERROR_SUCCESS {
        Ok(())
    } else {
        Err(store_error(code))
    }
}

/// Owned `HKEY`, closed exactly once on drop.
#[derive(Debug)]
struct Handle(
    /// Raw key handle.
    HKEY,
);

impl Drop for Handle {
    fn drop(&mut self) {
        // SAFETY: the handle was returned by a successful open or connect call
        // and is owned by this value only.
        let code = unsafe { RegCloseKey(self.0) };
        if code != ERROR_SUCCESS {
            debug!("Closing a registry handle failed: {}", store_error(code));
        }
    }
}

/// Open `path` below `parent` for reading. The empty path reopens `parent`.
fn open_key(parent: &Handle, path: &str) -> Result<RegistryHandle, StoreError> {
    let name = wide(path);
    let mut key: HKEY = ptr::null_mut();
    // SAFETY: `name` is NUL-terminated and outlives the call, `key` is a
    // valid out pointer.
    let code = unsafe { RegOpenKeyExW(parent.0, name.as_ptr(), 0, KEY_READ, &mut key) };
    check(code)?;
    Ok(RegistryHandle { handle: Handle(key) })
}

/// Reads the registry of this machine, or of remote machines running the
/// Remote Registry service.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryProvider;

impl Provider for RegistryProvider {
    type Connection = RegistryConnection;

    fn connect(&self, host: &str, hive: Hive) -> Result<RegistryConnection, StoreError> {
        let machine = (!is_local(host)).then(|| wide(&format!("\\\\{host}")));
        let machine_name = machine.as_ref().map_or(ptr::null(), Vec::as_ptr);
        let mut root: HKEY = ptr::null_mut();
        // SAFETY: `machine_name` is null or a NUL-terminated string kept alive
        // by `machine`, `root` is a valid out pointer.
        let code = unsafe { RegConnectRegistryW(machine_name, predefined(hive), &mut root) };
        check(code)?;

        debug!(
            "Opened {hive} on {host} ({})",
            if machine.is_some() { "remote" } else { "local" }
        );
        Ok(RegistryConnection { root: Handle(root) })
    }
}

/// Session with one hive of one machine.
#[derive(Debug)]
pub struct RegistryConnection {
    /// Root key returned by `RegConnectRegistryW`.
    root: Handle,
}

impl Connection for RegistryConnection {
    type Key = RegistryHandle;

    fn open(&self, path: &str) -> Result<RegistryHandle, StoreError> {
        open_key(&self.root, path)
    }
}

/// Counts reported by `RegQueryInfoKeyW`.
struct KeyInfo {
    /// Number of direct subkeys.
    subkeys: u32,
    /// Longest subkey name, in UTF-16 units without the terminator.
    max_name: u32,
    /// Number of values.
    values: u32,
}

/// Open registry key, closed on drop.
#[derive(Debug)]
pub struct RegistryHandle {
    /// Key opened with `KEY_READ`.
    handle: Handle,
}

impl RegistryHandle {
    /// Query the subkey and value counts of this key.
    fn info(&self) -> Result<KeyInfo, StoreError> {
        let mut subkeys: u32 = 0;
        let mut max_name: u32 = 0;
        let mut values: u32 = 0;
        // SAFETY: the handle is open, every non-null pointer is a valid out
        // pointer and every optional output is null.
        let code = unsafe {
            RegQueryInfoKeyW(
                self.handle.0,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null(),
                &mut subkeys,
                &mut max_name,
                ptr::null_mut(),
                &mut values,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        check(code)?;
        Ok(KeyInfo {
            subkeys,
            max_name,
            values,
        })
    }
}

/// Widen a Win32 count.
fn count(value: u32) -> Result<usize, StoreError> {
    usize::try_from(value).map_err(|_| StoreError::unavailable("count does not fit in memory"))
}

impl RegistryKey for RegistryHandle {
    fn subkey_names(&self) -> Result<Vec<String>, StoreError> {
        let info = self.info()?;
        let wanted = count(info.max_name)?.saturating_add(1);
        let mut buffer = vec![0_u16; wanted.max(NAME_BUFFER_UNITS)];
        let mut names = Vec::with_capacity(count(info.subkeys)?);
        let mut index: u32 = 0;

        loop {
            let mut length = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
            // SAFETY: `buffer` has room for `length` UTF-16 units and the
            // optional class and timestamp outputs are null.
            let code = unsafe {
                RegEnumKeyExW(
                    self.handle.0,
                    index,
                    buffer.as_mut_ptr(),
                    &mut length,
                    ptr::null(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            };
            match code {
                ERROR_SUCCESS => {
                    let units = buffer
                        .get(..count(length)?)
                        .ok_or_else(|| StoreError::unavailable("subkey name overflowed"))?;
                    names.push(String::from_utf16_lossy(units));
                    index = index
                        .checked_add(1)
                        .ok_or_else(|| StoreError::unavailable("too many subkeys"))?;
                }
                ERROR_MORE_DATA => {
                    let grown = buffer.len().saturating_mul(2);
                    buffer.resize(grown, 0);
                }
                ERROR_NO_MORE_ITEMS => return Ok(names),
                other => return Err(store_error(other)),
            }
        }
    }

    fn open_subkey(&self, name: &str) -> Result<RegistryHandle, StoreError> {
        open_key(&self.handle, name)
    }

    fn subkey_count(&self) -> Result<usize, StoreError> {
        count(self.info()?.subkeys)
    }

    fn value_count(&self) -> Result<usize, StoreError> {
        count(self.info()?.values)
    }
}
