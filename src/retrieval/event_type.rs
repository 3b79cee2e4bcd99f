use std::fmt;

/// Vendor event categories.
///
/// Export requests name one category at a time; search requests use
/// [`EventType::All`] to stream every category at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    AgentFramework,
    AppControl,
    AppControlLite,
    AppControlWhitelist,
    AppIsolation,
    BehavioralAnalysis,
    Compliance,
    DataProtection,
    Deception,
    DetectionMonitoring,
    DetectionResponse,
    DeviceControl,
    ExploitProtection,
    Firewall,
    LocationManagement,
    MalwareProtection,
    NetworkIntegrity,
    NetworkIps,
    PolicyManager,
    RoamingClient,
    TamperProtection,
    TdadProtect,
    Telemetry,
    VrAssessment,
    VrRemediation,
    WebSecurity,
    All,
}

impl EventType {
    /// Every concrete category, in the order export mode drains them.
    pub const CATEGORIES: [EventType; 26] = [
        EventType::AgentFramework,
        EventType::AppControl,
        EventType::AppControlLite,
        EventType::AppControlWhitelist,
        EventType::AppIsolation,
        EventType::BehavioralAnalysis,
        EventType::Compliance,
        EventType::DataProtection,
        EventType::Deception,
        EventType::DetectionMonitoring,
        EventType::DetectionResponse,
        EventType::DeviceControl,
        EventType::ExploitProtection,
        EventType::Firewall,
        EventType::LocationManagement,
        EventType::MalwareProtection,
        EventType::NetworkIntegrity,
        EventType::NetworkIps,
        EventType::PolicyManager,
        EventType::RoamingClient,
        EventType::TamperProtection,
        EventType::TdadProtect,
        EventType::Telemetry,
        EventType::VrAssessment,
        EventType::VrRemediation,
        EventType::WebSecurity,
    ];

    /// Name sent verbatim in request payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::AgentFramework => "AGENT FRAMEWORK",
            EventType::AppControl => "APP CONTROL",
            EventType::AppControlLite => "APP CONTROL LITE",
            EventType::AppControlWhitelist => "APP CONTROL WHITELIST",
            EventType::AppIsolation => "APP ISOLATION",
            EventType::BehavioralAnalysis => "BEHAVIORAL ANALYSIS",
            EventType::Compliance => "COMPLIANCE",
            EventType::DataProtection => "DATA PROTECTION",
            EventType::Deception => "DECEPTION",
            EventType::DetectionMonitoring => "DETECTION MONITORING",
            EventType::DetectionResponse => "DETECTION RESPONSE",
            EventType::DeviceControl => "DEVICE CONTROL",
            EventType::ExploitProtection => "EXPLOIT PROTECTION",
            EventType::Firewall => "FIREWALL",
            EventType::LocationManagement => "LOCATION MANAGEMENT",
            EventType::MalwareProtection => "MALWARE PROTECTION",
            EventType::NetworkIntegrity => "NETWORK INTEGRITY",
            EventType::NetworkIps => "NETWORK IPS",
            EventType::PolicyManager => "POLICY MANAGER",
            EventType::RoamingClient => "ROAMING CLIENT",
            EventType::TamperProtection => "TAMPER PROTECTION",
            EventType::TdadProtect => "TDAD PROTECT",
            EventType::Telemetry => "TELEMETRY",
            EventType::VrAssessment => "VR ASSESSMENT",
            EventType::VrRemediation => "VR REMEDIATION",
            EventType::WebSecurity => "WEB SECURITY",
            EventType::All => "ALL",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
