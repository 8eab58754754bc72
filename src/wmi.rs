//! COM/WMI backend for the HP BIOS interface
//!
//! Interface pointers, BSTRs and VARIANTs are the `windows` crate's owned
//! types and are released when they go out of scope, so a failed call never
//! leaks provider objects. The session holds the COM apartment for as long as
//! it exists and must be dropped on the thread that opened it.

use crate::bios::{
    field, BiosDataIn, BiosMethod, BIOS_DATA_IN_CLASS, BIOS_INSTANCE_QUERY, BIOS_METHOD_CLASS,
    IN_PARAM, OUT_PARAM, WMI_NAMESPACE,
};
use crate::errors::{Result, ThermalError};
use crate::provider::{BiosOutput, FirmwareProvider, FirmwareSession};
use log::debug;
use windows::core::{IUnknown, Interface, BSTR, HRESULT, PCWSTR};
use windows::Win32::Foundation::RPC_E_TOO_LATE;
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoInitializeSecurity, CoSetProxyBlanket, CoUninitialize,
    CLSCTX_INPROC_SERVER, COINIT_MULTITHREADED, EOAC_NONE, RPC_C_AUTHN_LEVEL_CALL,
    RPC_C_AUTHN_LEVEL_DEFAULT, RPC_C_IMP_LEVEL_IMPERSONATE,
};
use windows::Win32::System::Rpc::{RPC_C_AUTHN_WINNT, RPC_C_AUTHZ_NONE};
use windows::Win32::System::Variant::{
    InitVariantFromBuffer, VariantGetElementCount, VariantToBuffer, VARENUM, VARIANT, VT_ARRAY,
    VT_EMPTY, VT_NULL, VT_UI1,
};
use windows::Win32::System::Wmi::{
    IWbemClassObject, IWbemLocator, IWbemServices, WbemLocator, WBEM_E_NOT_FOUND,
    WBEM_FLAG_FORWARD_ONLY, WBEM_GENERIC_FLAG_TYPE, WBEM_FLAG_RETURN_IMMEDIATELY, WBEM_FLAG_RETURN_WBEM_COMPLETE,
    WBEM_INFINITE,
};

type ComResult<T> = std::result::Result<T, String>;

fn com<T>(call: &str, result: windows::core::Result<T>) -> ComResult<T> {
    result.map_err(|e| format!("{} failed: {}", call, e))
}

fn is_null(value: &VARIANT) -> bool {
    let vt = value.vt();
    vt == VT_NULL || vt == VT_EMPTY
}

fn u32_from(value: &VARIANT) -> ComResult<u32> {
    // CIM uint32 arrives as VT_I4
    let raw: i32 = value
        .try_into()
        .map_err(|e| format!("expected an integer: {}", e))?;
    Ok(raw as u32)
}

fn bool_from(value: &VARIANT) -> ComResult<Option<bool>> {
    if is_null(value) {
        return Ok(None);
    }
    bool::try_from(value)
        .map(Some)
        .map_err(|e| format!("expected a boolean: {}", e))
}

fn string_from(value: &VARIANT) -> ComResult<String> {
    if is_null(value) {
        return Ok(String::new());
    }
    BSTR::try_from(value)
        .map(|s| s.to_string())
        .map_err(|e| format!("expected a string: {}", e))
}

fn bytes_to_variant(data: &[u8]) -> ComResult<VARIANT> {
    com("InitVariantFromBuffer", unsafe {
        InitVariantFromBuffer(data.as_ptr().cast(), data.len() as u32)
    })
}

fn bytes_from(value: &VARIANT) -> ComResult<Option<Vec<u8>>> {
    if is_null(value) {
        return Ok(None);
    }
    if value.vt() != VARENUM(VT_ARRAY.0 | VT_UI1.0) {
        return Err(format!("expected a byte array, got {:?}", value.vt()));
    }
    let len = unsafe { VariantGetElementCount(value) } as usize;
    let mut bytes = vec![0u8; len];
    if len > 0 {
        com("VariantToBuffer", unsafe {
            VariantToBuffer(value, bytes.as_mut_ptr().cast(), len as u32)
        })?;
    }
    Ok(Some(bytes))
}

fn get(object: &IWbemClassObject, name: &str) -> ComResult<VARIANT> {
    get_optional(object, name)?.ok_or_else(|| format!("property {} not found", name))
}

fn get_optional(object: &IWbemClassObject, name: &str) -> ComResult<Option<VARIANT>> {
    let mut value = VARIANT::default();
    match unsafe { object.Get(&BSTR::from(name), 0, &mut value, None, None) } {
        Ok(()) => Ok(Some(value)),
        Err(e) if e.code() == HRESULT(WBEM_E_NOT_FOUND.0) => Ok(None),
        Err(e) => Err(format!("Get({}) failed: {}", name, e)),
    }
}

fn put(object: &IWbemClassObject, name: &str, value: &VARIANT) -> ComResult<()> {
    com(&format!("Put({})", name), unsafe {
        object.Put(&BSTR::from(name), 0, value, 0)
    })
}

/// COM initialization for the current thread
struct ComApartment;

impl ComApartment {
    fn enter() -> ComResult<Self> {
        com("CoInitializeEx", unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED).ok()
        })?;
        let apartment = Self;

        let security = unsafe {
            CoInitializeSecurity(
                None,
                -1,
                None,
                None,
                RPC_C_AUTHN_LEVEL_DEFAULT,
                RPC_C_IMP_LEVEL_IMPERSONATE,
                None,
                EOAC_NONE,
                None,
            )
        };
        match security {
            // Already set for this process by an earlier session
            Err(e) if e.code() == RPC_E_TOO_LATE => {}
            other => com("CoInitializeSecurity", other)?,
        }
        Ok(apartment)
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        unsafe { CoUninitialize() }
    }
}

/// Opens [`WmiSession`]s on the local machine
#[derive(Debug, Default, Clone, Copy)]
pub struct WmiProvider;

impl FirmwareProvider for WmiProvider {
    type Session = WmiSession;

    fn open_session(&self) -> Result<WmiSession> {
        WmiSession::open().map_err(ThermalError::SessionEstablishment)
    }
}

/// Connection to `root\wmi` plus the resolved `hpqBIntM` instance
pub struct WmiSession {
    services: IWbemServices,
    instance_path: BSTR,
    _instance: IWbemClassObject,
    // Dropped last
    _apartment: ComApartment,
}

impl WmiSession {
    fn open() -> ComResult<Self> {
        let apartment = ComApartment::enter()?;

        let locator: IWbemLocator = com("CoCreateInstance(WbemLocator)", unsafe {
            CoCreateInstance(&WbemLocator, None, CLSCTX_INPROC_SERVER)
        })?;
        let services = com("ConnectServer(root\\wmi)", unsafe {
            locator.ConnectServer(
                &BSTR::from(WMI_NAMESPACE),
                &BSTR::new(),
                &BSTR::new(),
                &BSTR::new(),
                0,
                &BSTR::new(),
                None,
            )
        })?;
        com("CoSetProxyBlanket", unsafe {
            CoSetProxyBlanket(
                &services,
                RPC_C_AUTHN_WINNT,
                RPC_C_AUTHZ_NONE,
                PCWSTR::null(),
                RPC_C_AUTHN_LEVEL_CALL,
                RPC_C_IMP_LEVEL_IMPERSONATE,
                None,
                EOAC_NONE,
            )
        })?;

        let instance = query_first(&services, BIOS_INSTANCE_QUERY)?;
        let path = string_from(&get(&instance, field::PATH)?)?;
        debug!("Resolved BIOS method instance {}", path);

        Ok(Self {
            services,
            instance_path: BSTR::from(path),
            _instance: instance,
            _apartment: apartment,
        })
    }

    fn get_class(&self, name: &str) -> ComResult<IWbemClassObject> {
        let mut class = None;
        com(&format!("GetObject({})", name), unsafe {
            self.services.GetObject(
                &BSTR::from(name),
                WBEM_FLAG_RETURN_WBEM_COMPLETE,
                None,
                Some(&mut class),
                None,
            )
        })?;
        class.ok_or_else(|| format!("class {} not found", name))
    }

    fn build_data_in(&self, input: &BiosDataIn) -> ComResult<IWbemClassObject> {
        let class = self.get_class(BIOS_DATA_IN_CLASS)?;
        let data_in = com("SpawnInstance", unsafe { class.SpawnInstance(0) })?;

        put(&data_in, field::COMMAND, &VARIANT::from(input.command as i32))?;
        put(&data_in, field::COMMAND_TYPE, &VARIANT::from(input.command_type as i32))?;
        put(&data_in, field::DATA_IN, &bytes_to_variant(&input.data)?)?;
        put(&data_in, field::SIZE, &VARIANT::from(input.size as i32))?;
        put(&data_in, field::SIGN, &bytes_to_variant(&input.sign)?)?;
        Ok(data_in)
    }

    fn build_in_params(
        &self,
        method: BiosMethod,
        data_in: &IWbemClassObject,
    ) -> ComResult<IWbemClassObject> {
        let class = self.get_class(BIOS_METHOD_CLASS)?;
        let mut signature = None;
        com(&format!("GetMethod({})", method.name()), unsafe {
            class.GetMethod(&BSTR::from(method.name()), 0, &mut signature, &mut None)
        })?;
        let signature = signature.ok_or_else(|| format!("{} takes no input", method.name()))?;

        let params = com("SpawnInstance", unsafe { signature.SpawnInstance(0) })?;
        let unknown: IUnknown = com("cast(IUnknown)", data_in.cast())?;
        put(&params, IN_PARAM, &VARIANT::from(unknown))?;
        Ok(params)
    }

    fn exec(&self, method: BiosMethod, input: &BiosDataIn) -> ComResult<Option<WmiOutput>> {
        let data_in = self.build_data_in(input)?;
        let in_params = self.build_in_params(method, &data_in)?;

        let mut out_params = None;
        com(&format!("ExecMethod({})", method.name()), unsafe {
            self.services.ExecMethod(
                &self.instance_path,
                &BSTR::from(method.name()),
                Default::default(),
                None,
                Some(&in_params),
                Some(&mut out_params),
                None,
            )
        })?;

        let Some(out_params) = out_params else {
            return Ok(None);
        };
        let out_data = match get_optional(&out_params, OUT_PARAM)? {
            Some(value) if !is_null(&value) => value,
            _ => return Ok(None),
        };
        let unknown = IUnknown::try_from(&out_data)
            .map_err(|e| format!("{} is not an object: {}", OUT_PARAM, e))?;
        let object = com("cast(IWbemClassObject)", unknown.cast::<IWbemClassObject>())?;
        Ok(Some(WmiOutput(object)))
    }
}

impl FirmwareSession for WmiSession {
    type Output = WmiOutput;

    fn invoke(&mut self, method: BiosMethod, input: &BiosDataIn) -> Result<Option<WmiOutput>> {
        self.exec(method, input).map_err(ThermalError::Provider)
    }
}

/// `OutData` object returned by an `hpqBIOSInt*` call
pub struct WmiOutput(IWbemClassObject);

impl WmiOutput {
    fn property<T>(&self, name: &str, convert: fn(&VARIANT) -> ComResult<T>) -> Result<T> {
        get(&self.0, name)
            .and_then(|value| convert(&value))
            .map_err(ThermalError::Provider)
    }
}

impl BiosOutput for WmiOutput {
    fn class_name(&self) -> Result<String> {
        self.property(field::CLASS, string_from)
    }

    fn return_code(&self) -> Result<u32> {
        self.property(field::RETURN_CODE, u32_from)
    }

    fn active(&self) -> Result<Option<bool>> {
        self.property(field::ACTIVE, bool_from)
    }

    fn data(&self) -> Result<Option<Vec<u8>>> {
        match get_optional(&self.0, field::DATA_OUT).map_err(ThermalError::Provider)? {
            Some(value) => bytes_from(&value).map_err(ThermalError::Provider),
            None => Ok(None),
        }
    }

    fn instance_name(&self) -> Result<String> {
        self.property(field::INSTANCE_NAME, string_from)
    }

    fn signature(&self) -> Result<Vec<u8>> {
        Ok(self.property(field::SIGN, bytes_from)?.unwrap_or_default())
    }
}

/// Run a WQL query and return the first result
fn query_first(services: &IWbemServices, query: &str) -> ComResult<IWbemClassObject> {
    let enumerator = com(&format!("ExecQuery({})", query), unsafe {
        services.ExecQuery(
            &BSTR::from("WQL"),
            &BSTR::from(query),
            WBEM_GENERIC_FLAG_TYPE(WBEM_FLAG_FORWARD_ONLY.0 | WBEM_FLAG_RETURN_IMMEDIATELY.0),
            None,
        )
    })?;

    let mut objects = [None];
    let mut returned = 0;
    com("IEnumWbemClassObject::Next", unsafe {
        enumerator
            .Next(WBEM_INFINITE.0, &mut objects, &mut returned)
            .ok()
    })?;
    match objects {
        [Some(object)] if returned == 1 => Ok(object),
        _ => Err(format!("{} matched no instance", query)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_array_variant_round_trip() {
        let value = bytes_to_variant(&[0x40, 45, 0, 0]).unwrap();
        assert_eq!(value.vt(), VARENUM(VT_ARRAY.0 | VT_UI1.0));
        assert_eq!(bytes_from(&value).unwrap(), Some(vec![0x40, 45, 0, 0]));
    }

    #[test]
    fn test_empty_variant_reads_as_absent() {
        let value = VARIANT::default();
        assert_eq!(bytes_from(&value).unwrap(), None);
        assert_eq!(bool_from(&value).unwrap(), None);
        assert_eq!(string_from(&value).unwrap(), "");
    }

    #[test]
    fn test_uint32_arrives_as_signed() {
        assert_eq!(u32_from(&VARIANT::from(131080i32)).unwrap(), 131080);
        assert_eq!(u32_from(&VARIANT::from(-1i32)).unwrap(), u32::MAX);
    }

    #[test]
    fn test_non_array_is_not_bytes() {
        assert!(bytes_from(&VARIANT::from(5i32)).is_err());
    }
}
