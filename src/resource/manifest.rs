//! Application manifests.
//!
//! The manifest is surfaced verbatim as UTF-8 XML; it is deliberately not
//! parsed. Every predicate below is a literal substring match against
//! well-known element names and GUIDs — conservative by design: a predicate
//! answers "does the manifest visibly say so", nothing more.

/// supportedOS GUID for Windows Vista.
pub const OS_GUID_VISTA: &str = "{e2011457-1546-43c5-a5fe-008deee3d3f0}";
/// supportedOS GUID for Windows 7.
pub const OS_GUID_WIN7: &str = "{35138b9a-5d96-4fbd-8e2d-a2440225f93a}";
/// supportedOS GUID for Windows 8.
pub const OS_GUID_WIN8: &str = "{4a2f28e3-53b9-4441-ba9c-d69d4a4a6e38}";
/// supportedOS GUID for Windows 8.1.
pub const OS_GUID_WIN81: &str = "{1f676c76-80e1-4239-95bb-83d0f6d0da78}";
/// supportedOS GUID for Windows 10.
pub const OS_GUID_WIN10: &str = "{8e0f7a12-bfb3-4fe8-b9a5-48fd50a15a9a}";
/// supportedOS GUID observed for Windows 11 manifests.
pub const OS_GUID_WIN11: &str = "{8e0f7a12-bfb3-4fe8-b9a5-48fd50a15a9b}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpiAwareness {
    Unspecified,
    Unaware,
    SystemAware,
    PerMonitor,
    PerMonitorV2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest<'a> {
    /// The raw XML bytes
    pub xml: &'a [u8],
}

pub fn parse(data: &[u8]) -> Option<Manifest<'_>> {
    (!data.is_empty()).then_some(Manifest { xml: data })
}

impl<'a> Manifest<'a> {
    /// The manifest as text, lossily decoded.
    pub fn as_str(&self) -> std::borrow::Cow<'a, str> {
        String::from_utf8_lossy(self.xml)
    }

    /// Literal substring check, the primitive all predicates reduce to.
    pub fn contains(&self, needle: &str) -> bool {
        self.as_str().contains(needle)
    }

    // UAC / execution level

    pub fn requires_admin(&self) -> bool {
        self.contains("requireAdministrator")
    }

    pub fn requires_highest_available(&self) -> bool {
        self.contains("highestAvailable")
    }

    pub fn runs_as_invoker(&self) -> bool {
        self.contains("asInvoker")
    }

    pub fn is_auto_elevate(&self) -> bool {
        self.contains("autoElevate")
    }

    // DPI awareness

    pub fn dpi_awareness(&self) -> DpiAwareness {
        // the modern dpiAwareness element wins over the legacy dpiAware
        if self.contains("PerMonitorV2") {
            return DpiAwareness::PerMonitorV2;
        }
        if self.contains("dpiAwareness") {
            if self.contains("PerMonitor") {
                return DpiAwareness::PerMonitor;
            }
            if self.contains("System") {
                return DpiAwareness::SystemAware;
            }
            return DpiAwareness::Unaware;
        }
        if self.contains("dpiAware") {
            if self.contains("true") {
                return DpiAwareness::SystemAware;
            }
            return DpiAwareness::Unaware;
        }
        DpiAwareness::Unspecified
    }

    pub fn is_dpi_aware(&self) -> bool {
        self.dpi_awareness() != DpiAwareness::Unspecified
    }

    pub fn has_gdi_scaling(&self) -> bool {
        self.contains("gdiScaling")
    }

    // supported OS declarations

    pub fn supports_windows_vista(&self) -> bool {
        self.contains(OS_GUID_VISTA)
    }

    pub fn supports_windows7(&self) -> bool {
        self.contains(OS_GUID_WIN7)
    }

    pub fn supports_windows8(&self) -> bool {
        self.contains(OS_GUID_WIN8)
    }

    pub fn supports_windows8_1(&self) -> bool {
        self.contains(OS_GUID_WIN81)
    }

    pub fn supports_windows10(&self) -> bool {
        self.contains(OS_GUID_WIN10)
    }

    pub fn supports_windows11(&self) -> bool {
        self.contains(OS_GUID_WIN11)
    }

    // assorted opt-ins

    pub fn is_long_path_aware(&self) -> bool {
        self.contains("longPathAware")
    }

    pub fn is_utf8_code_page(&self) -> bool {
        self.contains("activeCodePage") && self.contains("UTF-8")
    }

    pub fn uses_segment_heap(&self) -> bool {
        self.contains("heapType") && self.contains("SegmentHeap")
    }

    pub fn disables_theming(&self) -> bool {
        self.contains("noVisualStyles")
    }

    pub fn disables_window_filtering(&self) -> bool {
        self.contains("disableWindowFiltering")
    }

    pub fn has_printer_driver_isolation(&self) -> bool {
        self.contains("printerDriverIsolation")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v1" manifestVersion="1.0">
  <trustInfo><security><requestedPrivileges>
    <requestedExecutionLevel level="requireAdministrator" uiAccess="false"/>
  </requestedPrivileges></security></trustInfo>
  <compatibility><application>
    <supportedOS Id="{8e0f7a12-bfb3-4fe8-b9a5-48fd50a15a9a}"/>
  </application></compatibility>
  <application><windowsSettings>
    <dpiAwareness>PerMonitorV2</dpiAwareness>
    <longPathAware>true</longPathAware>
  </windowsSettings></application>
</assembly>"#;

    #[test]
    fn predicates_are_substring_matches() {
        let manifest = parse(SAMPLE.as_bytes()).unwrap();
        assert!(manifest.requires_admin());
        assert!(!manifest.runs_as_invoker());
        assert!(manifest.supports_windows10());
        assert!(!manifest.supports_windows7());
        assert_eq!(manifest.dpi_awareness(), DpiAwareness::PerMonitorV2);
        assert!(manifest.is_long_path_aware());
        assert!(!manifest.uses_segment_heap());
    }

    #[test]
    fn empty_manifest_is_none() {
        assert!(parse(&[]).is_none());
    }
}
