use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;

/// Fallback for addresses outside every known JIT-compiled method
///
/// Native symbol lookup against loaded module images lives outside this crate;
/// callers plug it in here.
pub trait NativeResolver: Send {
    fn resolve_native(&self, address: u64) -> Option<String>;
}

impl<F> NativeResolver for F
where
    F: Fn(u64) -> Option<String> + Send,
{
    fn resolve_native(&self, address: u64) -> Option<String> {
        self(address)
    }
}

/// One JIT-compiled method body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRecord {
    pub start_address: u64,
    pub size: u32,
    pub full_name: Arc<str>,
}

impl MethodRecord {
    /// Build the display name from the runtime's method load fields
    ///
    /// Constructors render as `Type(params)`, everything else as
    /// `Type.Method(params)`. Parameters are the signature text after the first
    /// `"  ("`; a signature without one renders as `(???)`.
    #[must_use]
    pub fn new(
        start_address: u64,
        size: u32,
        namespace: &str,
        name: &str,
        signature: &str,
    ) -> Self {
        let parameters = signature.find("  (").map_or("(???)", |pos| &signature[pos + 2..]);
        let full_name = if name == ".ctor" {
            format!("{namespace}{parameters}")
        } else {
            format!("{namespace}.{name}{parameters}")
        };
        Self { start_address, size, full_name: full_name.into() }
    }

    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start_address && address - self.start_address < u64::from(self.size)
    }
}

/// Address-to-name resolution for one process
///
/// Every answer, including hex fallbacks, is cached for the lifetime of the
/// store. Methods are never unloaded in the supported scenarios, so entries are
/// never invalidated.
pub struct MethodStore {
    methods: Vec<MethodRecord>,
    /// Cache of resolved names by address
    cache: RefCell<HashMap<u64, Arc<str>>>,
    native: Option<Box<dyn NativeResolver>>,
    scans: Cell<usize>,
}

impl Default for MethodStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
            cache: RefCell::new(HashMap::new()),
            native: None,
            scans: Cell::new(0),
        }
    }

    /// Store with a native-symbol fallback
    #[must_use]
    pub fn with_native_resolver(resolver: Box<dyn NativeResolver>) -> Self {
        Self { native: Some(resolver), ..Self::new() }
    }

    pub fn set_native_resolver(&mut self, resolver: Box<dyn NativeResolver>) {
        self.native = Some(resolver);
    }

    /// Register a method body reported by a load or rundown event
    pub fn add_method(
        &mut self,
        start_address: u64,
        size: u32,
        namespace: &str,
        name: &str,
        signature: &str,
    ) -> &MethodRecord {
        self.methods.push(MethodRecord::new(start_address, size, namespace, name, signature));
        &self.methods[self.methods.len() - 1]
    }

    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Number of linear scans performed so far (cache misses)
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.scans.get()
    }

    /// Resolve an instruction address to a display name
    ///
    /// Order: cache, method ranges, native resolver, `0x{address:x}`.
    pub fn resolve(&self, address: u64) -> Arc<str> {
        // === CACHE CHECK ===
        if let Some(cached) = self.cache.borrow().get(&address) {
            return Arc::clone(cached);
        }

        // === METHOD RANGES ===
        self.scans.set(self.scans.get() + 1);
        let name = self
            .methods
            .iter()
            .find(|m| m.contains(address))
            .map(|m| Arc::clone(&m.full_name))
            .or_else(|| {
                // === NATIVE FALLBACK ===
                self.native.as_ref().and_then(|r| r.resolve_native(address)).map(Arc::from)
            })
            .unwrap_or_else(|| Arc::from(format!("0x{address:x}")));

        self.cache.borrow_mut().insert(address, Arc::clone(&name));
        name
    }
}
