use std::cell::Cell;

use windows::core::{BSTR, HSTRING, PCWSTR};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoInitializeSecurity, CoSetProxyBlanket,
    CLSCTX_INPROC_SERVER, COINIT_MULTITHREADED, EOAC_NONE, RPC_C_AUTHN_LEVEL_CALL,
    RPC_C_AUTHN_LEVEL_DEFAULT, RPC_C_IMP_LEVEL_IMPERSONATE,
};
use windows::Win32::System::Rpc::{RPC_C_AUTHN_WINNT, RPC_C_AUTHZ_NONE};
use windows::Win32::System::Variant::VARIANT;
use windows::Win32::System::Wmi::{
    IEnumWbemClassObject, IWbemClassObject, IWbemLocator, IWbemServices, WbemLocator,
    WBEM_FLAG_CONNECT_USE_MAX_WAIT, WBEM_FLAG_FORWARD_ONLY, WBEM_FLAG_RETURN_IMMEDIATELY,
    WBEM_INFINITE,
};

use crate::error::{Error, Result};

thread_local! {
    static COM_INITIALIZED: Cell<bool> = const { Cell::new(false) };
}

/// Hyper-V WMI namespace.
pub const HYPERV_NAMESPACE: &str = r"root\virtualization\v2";

pub(crate) fn wmi_error(context: impl Into<String>) -> impl FnOnce(windows::core::Error) -> Error {
    let context = context.into();
    move |source| Error::Wmi { context, source }
}

/// Credentials for remote WMI connection.
#[derive(Clone)]
pub struct Credentials {
    pub domain: Option<String>,
    pub username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            domain: None,
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn with_domain(
        domain: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            domain: Some(domain.into()),
            username: username.into(),
            password: password.into(),
        }
    }

    /// domain\user, or just user.
    pub fn full_username(&self) -> String {
        match self.domain {
            Some(ref domain) => format!("{}\\{}", domain, self.username),
            None => self.username.clone(),
        }
    }
}

/// WMI connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Target machine name (None for local).
    pub machine_name: Option<String>,
    pub credentials: Option<Credentials>,
    pub namespace: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            machine_name: None,
            credentials: None,
            namespace: HYPERV_NAMESPACE.to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn remote(machine_name: impl Into<String>) -> Self {
        Self {
            machine_name: Some(machine_name.into()),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn namespace_path(&self) -> String {
        match self.machine_name {
            Some(ref machine) => format!("\\\\{}\\{}", machine, self.namespace),
            None => self.namespace.clone(),
        }
    }
}

/// COM-level access to one WMI namespace.
pub struct WmiConnection {
    services: IWbemServices,
    config: ConnectionConfig,
}

impl std::fmt::Debug for WmiConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WmiConnection")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WmiConnection {
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        unsafe {
            Self::init_com();

            let locator: IWbemLocator = CoCreateInstance(&WbemLocator, None, CLSCTX_INPROC_SERVER)
                .map_err(wmi_error("create locator"))?;

            let namespace = BSTR::from(config.namespace_path());
            let (user, password, flags) = match config.credentials {
                Some(ref creds) => (
                    BSTR::from(creds.full_username()),
                    BSTR::from(creds.password.as_str()),
                    WBEM_FLAG_CONNECT_USE_MAX_WAIT.0 as i32,
                ),
                None => (BSTR::new(), BSTR::new(), 0i32),
            };

            let services = locator
                .ConnectServer(
                    &namespace,
                    &user,
                    &password,
                    &BSTR::new(),
                    flags,
                    &BSTR::new(),
                    None,
                )
                .map_err(wmi_error(format!("connect to {}", config.namespace_path())))?;

            CoSetProxyBlanket(
                &services,
                RPC_C_AUTHN_WINNT,
                RPC_C_AUTHZ_NONE,
                None,
                RPC_C_AUTHN_LEVEL_CALL,
                RPC_C_IMP_LEVEL_IMPERSONATE,
                None,
                EOAC_NONE,
            )
            .map_err(wmi_error("set proxy blanket"))?;

            Ok(Self {
                services,
                config: config.clone(),
            })
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Initialize COM for the current thread. Repeat calls are no-ops.
    fn init_com() {
        COM_INITIALIZED.with(|initialized| {
            if !initialized.get() {
                unsafe {
                    let _ = CoInitializeEx(None, COINIT_MULTITHREADED);
                    let _ = CoInitializeSecurity(
                        None,
                        -1,
                        None,
                        None,
                        RPC_C_AUTHN_LEVEL_DEFAULT,
                        RPC_C_IMP_LEVEL_IMPERSONATE,
                        None,
                        EOAC_NONE,
                        None,
                    );
                }
                initialized.set(true);
            }
        })
    }

    /// Execute a WQL query and return all results.
    pub fn query(&self, wql: &str) -> Result<Vec<IWbemClassObject>> {
        let enumerator = unsafe {
            self.services
                .ExecQuery(
                    &BSTR::from("WQL"),
                    &BSTR::from(wql),
                    WBEM_FLAG_FORWARD_ONLY | WBEM_FLAG_RETURN_IMMEDIATELY,
                    None,
                )
                .map_err(wmi_error(format!("query '{}'", wql)))?
        };
        Ok(collect_results(&enumerator))
    }

    pub fn query_first(&self, wql: &str) -> Result<Option<IWbemClassObject>> {
        Ok(self.query(wql)?.into_iter().next())
    }

    /// Get a single object (or class) by path.
    pub fn get_object(&self, path: &str) -> Result<IWbemClassObject> {
        let mut obj = None;
        unsafe {
            self.services
                .GetObject(&BSTR::from(path), Default::default(), None, Some(&mut obj), None)
                .map_err(wmi_error(format!("get object {}", path)))?;
        }
        obj.ok_or_else(|| Error::not_found("Object", path))
    }

    pub fn spawn_instance(&self, class_name: &str) -> Result<IWbemClassObject> {
        let class = self.get_object(class_name)?;
        unsafe {
            class
                .SpawnInstance(0)
                .map_err(wmi_error(format!("spawn {}", class_name)))
        }
    }

    /// Blank input parameters for `class_name::method_name`.
    pub fn get_method_params(
        &self,
        class_name: &str,
        method_name: &str,
    ) -> Result<Option<IWbemClassObject>> {
        let class = self.get_object(class_name)?;
        let context = format!("{}::{} parameters", class_name, method_name);
        unsafe {
            let method = HSTRING::from(method_name);
            let mut in_params = None;
            let mut out_params = None;
            class
                .GetMethod(PCWSTR(method.as_ptr()), 0, &mut in_params, &mut out_params)
                .map_err(wmi_error(context.clone()))?;
            in_params
                .map(|p| p.SpawnInstance(0))
                .transpose()
                .map_err(wmi_error(context))
        }
    }

    pub fn exec_method(
        &self,
        object_path: &str,
        method_name: &str,
        in_params: Option<&IWbemClassObject>,
    ) -> Result<IWbemClassObject> {
        let mut out_params = None;
        unsafe {
            self.services
                .ExecMethod(
                    &BSTR::from(object_path),
                    &BSTR::from(method_name),
                    Default::default(),
                    None,
                    in_params,
                    Some(&mut out_params),
                    None,
                )
                .map_err(wmi_error(format!("{} on {}", method_name, object_path)))?;
        }
        out_params.ok_or_else(|| Error::Transport(format!("{} returned no output", method_name)))
    }

    /// Path of the default settings for a resource sub-type.
    ///
    /// Walks the primordial pool to its allocation capabilities and picks the
    /// settings whose ValueRole is Default (0).
    pub fn default_resource_path(&self, resource_subtype: &str) -> Result<String> {
        let pool_query = format!(
            "SELECT * FROM Msvm_ResourcePool WHERE ResourceSubType = '{}' AND Primordial = TRUE",
            resource_subtype.replace('\'', "''")
        );
        let pool = self
            .query_first(&pool_query)?
            .ok_or_else(|| Error::not_found("Resource pool", resource_subtype))?;

        let caps_query = format!(
            "ASSOCIATORS OF {{{}}} WHERE AssocClass = Msvm_ElementCapabilities ResultClass = Msvm_AllocationCapabilities",
            pool.get_path()?
        );
        let caps = self
            .query_first(&caps_query)?
            .ok_or_else(|| Error::not_found("Allocation capabilities", resource_subtype))?;

        let assoc_query = format!(
            "REFERENCES OF {{{}}} WHERE ResultClass = Msvm_SettingsDefineCapabilities",
            caps.get_path()?
        );
        for assoc in self.query(&assoc_query)? {
            if assoc.get_u32("ValueRole")? == Some(0) {
                if let Some(part) = assoc.get_string_prop("PartComponent")? {
                    return Ok(part);
                }
            }
        }
        Err(Error::not_found("Default settings", resource_subtype))
    }
}

fn collect_results(enumerator: &IEnumWbemClassObject) -> Vec<IWbemClassObject> {
    let mut results = Vec::new();
    loop {
        let mut objects: [Option<IWbemClassObject>; 1] = [None];
        let mut returned = 0u32;
        unsafe {
            let hr = enumerator.Next(WBEM_INFINITE, &mut objects, &mut returned);
            if hr.is_err() || returned == 0 {
                break;
            }
        }
        if let Some(obj) = objects[0].take() {
            results.push(obj);
        }
    }
    results
}

/// Typed property access on IWbemClassObject.
pub trait WbemClassObjectExt {
    fn get_string_prop(&self, name: &str) -> Result<Option<String>>;
    fn get_u16(&self, name: &str) -> Result<Option<u16>>;
    fn get_u32(&self, name: &str) -> Result<Option<u32>>;
    fn get_u64(&self, name: &str) -> Result<Option<u64>>;
    fn get_bool(&self, name: &str) -> Result<Option<bool>>;
    fn get_string_array(&self, name: &str) -> Result<Option<Vec<String>>>;

    /// The object path (__PATH).
    fn get_path(&self) -> Result<String>;

    fn put_string(&self, name: &str, value: &str) -> Result<()>;
    fn put_u16(&self, name: &str, value: u16) -> Result<()>;
    fn put_u32(&self, name: &str, value: u32) -> Result<()>;
    fn put_u64(&self, name: &str, value: u64) -> Result<()>;
    fn put_bool(&self, name: &str, value: bool) -> Result<()>;
    fn put_string_array(&self, name: &str, values: &[String]) -> Result<()>;

    /// Serialize as an embedded instance (WMI DTD 2.0).
    fn get_text(&self) -> Result<String>;
}

/// Read a property. Missing properties and NULL both come back as `None`.
unsafe fn read(obj: &IWbemClassObject, name: &str) -> Option<VARIANT> {
    use windows::Win32::System::Variant::{VT_EMPTY, VT_NULL};

    let name = HSTRING::from(name);
    let mut value = VARIANT::default();
    obj.Get(PCWSTR(name.as_ptr()), 0, &mut value, None, None).ok()?;
    let vt = value.Anonymous.Anonymous.vt;
    if vt == VT_NULL || vt == VT_EMPTY {
        return None;
    }
    Some(value)
}

/// WMI hands back every integer up to 32 bits as VT_I4 and 64-bit values as
/// VT_BSTR, so conversion goes by the declared type rather than the tag.
unsafe fn read_integer(value: &VARIANT) -> Option<u64> {
    use windows::Win32::System::Variant::{VT_BSTR, VT_I2, VT_I4, VT_I8, VT_UI1, VT_UI2, VT_UI4, VT_UI8};

    let inner = &value.Anonymous.Anonymous;
    let data = &inner.Anonymous;
    match inner.vt {
        VT_UI1 => Some(u64::from(data.bVal)),
        VT_I2 => Some(u64::from(data.iVal as u16)),
        VT_UI2 => Some(u64::from(data.uiVal)),
        VT_I4 => Some(u64::from(data.lVal as u32)),
        VT_UI4 => Some(u64::from(data.ulVal)),
        VT_I8 => Some(data.llVal as u64),
        VT_UI8 => Some(data.ullVal),
        VT_BSTR => data.bstrVal.to_string().trim().parse().ok(),
        _ => None,
    }
}

impl WbemClassObjectExt for IWbemClassObject {
    fn get_string_prop(&self, name: &str) -> Result<Option<String>> {
        use windows::Win32::System::Variant::VT_BSTR;

        unsafe {
            let Some(value) = read(self, name) else {
                return Ok(None);
            };
            if value.Anonymous.Anonymous.vt != VT_BSTR {
                return Err(Error::Transport(format!("property {} is not a string", name)));
            }
            Ok(Some(value.Anonymous.Anonymous.Anonymous.bstrVal.to_string()))
        }
    }

    fn get_u16(&self, name: &str) -> Result<Option<u16>> {
        Ok(self.get_u64(name)?.and_then(|v| u16::try_from(v).ok()))
    }

    fn get_u32(&self, name: &str) -> Result<Option<u32>> {
        Ok(self.get_u64(name)?.and_then(|v| u32::try_from(v).ok()))
    }

    fn get_u64(&self, name: &str) -> Result<Option<u64>> {
        unsafe { Ok(read(self, name).and_then(|v| read_integer(&v))) }
    }

    fn get_bool(&self, name: &str) -> Result<Option<bool>> {
        use windows::Win32::System::Variant::VT_BOOL;

        unsafe {
            Ok(read(self, name).and_then(|v| {
                (v.Anonymous.Anonymous.vt == VT_BOOL)
                    .then(|| v.Anonymous.Anonymous.Anonymous.boolVal.as_bool())
            }))
        }
    }

    fn get_string_array(&self, name: &str) -> Result<Option<Vec<String>>> {
        use windows::Win32::System::Ole::{SafeArrayGetElement, SafeArrayGetLBound, SafeArrayGetUBound};
        use windows::Win32::System::Variant::{VT_ARRAY, VT_BSTR};

        unsafe {
            let Some(value) = read(self, name) else {
                return Ok(None);
            };
            if value.Anonymous.Anonymous.vt != (VT_ARRAY | VT_BSTR) {
                return Ok(None);
            }
            let sa = value.Anonymous.Anonymous.Anonymous.parray;
            if sa.is_null() {
                return Ok(Some(Vec::new()));
            }

            let lower = SafeArrayGetLBound(sa, 1).map_err(wmi_error("SafeArrayGetLBound"))?;
            let upper = SafeArrayGetUBound(sa, 1).map_err(wmi_error("SafeArrayGetUBound"))?;
            let mut result = Vec::new();
            for i in lower..=upper {
                let mut element = BSTR::new();
                SafeArrayGetElement(sa, &i, &mut element as *mut BSTR as *mut _)
                    .map_err(wmi_error("SafeArrayGetElement"))?;
                result.push(element.to_string());
            }
            Ok(Some(result))
        }
    }

    fn get_path(&self) -> Result<String> {
        self.get_string_prop("__PATH")?
            .ok_or_else(|| Error::validation("__PATH", "object has no path"))
    }

    fn put_string(&self, name: &str, value: &str) -> Result<()> {
        put(self, name, &VARIANT::from(BSTR::from(value)))
    }

    fn put_u16(&self, name: &str, value: u16) -> Result<()> {
        // WMI expects uint16 as a signed 16-bit variant.
        put(self, name, &VARIANT::from(value as i16))
    }

    fn put_u32(&self, name: &str, value: u32) -> Result<()> {
        put(self, name, &VARIANT::from(value as i32))
    }

    fn put_u64(&self, name: &str, value: u64) -> Result<()> {
        // uint64 travels as a decimal string.
        self.put_string(name, &value.to_string())
    }

    fn put_bool(&self, name: &str, value: bool) -> Result<()> {
        put(self, name, &VARIANT::from(value))
    }

    fn put_string_array(&self, name: &str, values: &[String]) -> Result<()> {
        use windows::Win32::System::Com::SAFEARRAYBOUND;
        use windows::Win32::System::Ole::{SafeArrayCreate, SafeArrayDestroy, SafeArrayPutElement};
        use windows::Win32::System::Variant::{VT_ARRAY, VT_BSTR};

        unsafe {
            let bounds = SAFEARRAYBOUND {
                cElements: values.len() as u32,
                lLbound: 0,
            };
            let sa = SafeArrayCreate(VT_BSTR, 1, &bounds);
            if sa.is_null() {
                return Err(Error::Transport(format!("failed to allocate array for {}", name)));
            }

            for (i, value) in values.iter().enumerate() {
                let bstr = BSTR::from(value.as_str());
                let index = i as i32;
                if let Err(e) = SafeArrayPutElement(sa, &index, bstr.as_ptr() as *const _) {
                    let _ = SafeArrayDestroy(sa);
                    return Err(wmi_error(format!("fill {}", name))(e));
                }
            }

            // The variant owns the array from here on.
            let mut variant = VARIANT::default();
            (*variant.Anonymous.Anonymous).vt = VT_ARRAY | VT_BSTR;
            (*variant.Anonymous.Anonymous).Anonymous.parray = sa;
            put(self, name, &variant)
        }
    }

    fn get_text(&self) -> Result<String> {
        use windows::Win32::System::Wmi::{
            IWbemObjectTextSrc, WbemObjectTextSrc, WMI_OBJ_TEXT_WMI_DTD_2_0,
        };

        unsafe {
            let text_src: IWbemObjectTextSrc =
                CoCreateInstance(&WbemObjectTextSrc, None, CLSCTX_INPROC_SERVER)
                    .map_err(wmi_error("create text source"))?;
            let text = text_src
                .GetText(0, self, WMI_OBJ_TEXT_WMI_DTD_2_0.0 as u32, None)
                .map_err(wmi_error("serialize embedded instance"))?;
            Ok(text.to_string())
        }
    }
}

fn put(obj: &IWbemClassObject, name: &str, value: &VARIANT) -> Result<()> {
    let property = HSTRING::from(name);
    unsafe {
        obj.Put(PCWSTR(property.as_ptr()), 0, value, 0)
            .map_err(wmi_error(format!("set {}", name)))
    }
}
