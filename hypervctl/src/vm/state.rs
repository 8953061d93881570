use core::fmt;

/// VM enabled state (Msvm_ComputerSystem.EnabledState).
///
/// The `*Critical` variants report the same state while the VM's storage is
/// unavailable. Compare through [`VmState::matches`], which folds them onto
/// their base state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum VmState {
    Unknown = 0,
    Other = 1,
    Running = 2,
    Off = 3,
    Stopping = 4,
    Saved = 6,
    Paused = 9,
    Starting = 10,
    Reset = 11,
    Saving = 32773,
    Pausing = 32776,
    Resuming = 32777,
    FastSaved = 32779,
    FastSaving = 32780,
    ForceShutdown = 32781,
    ForceReboot = 32782,
    Hibernated = 32783,
    ComponentServicing = 32784,
    RunningCritical = 32785,
    OffCritical = 32786,
    StoppingCritical = 32787,
    SavedCritical = 32788,
    PausedCritical = 32789,
    StartingCritical = 32790,
    ResetCritical = 32791,
    SavingCritical = 32792,
    PausingCritical = 32793,
    ResumingCritical = 32794,
    FastSavedCritical = 32795,
    FastSavingCritical = 32796,
}

impl VmState {
    /// Parse from WMI EnabledState value.
    pub fn from_enabled_state(value: u16) -> Self {
        match value {
            1 => VmState::Other,
            2 => VmState::Running,
            3 => VmState::Off,
            4 => VmState::Stopping,
            6 => VmState::Saved,
            9 => VmState::Paused,
            10 => VmState::Starting,
            11 => VmState::Reset,
            // Values reported by older hosts.
            32768 => VmState::Paused,
            32769 => VmState::Saved,
            32770 => VmState::Starting,
            32774 => VmState::Stopping,
            32773 => VmState::Saving,
            32776 => VmState::Pausing,
            32777 => VmState::Resuming,
            32779 => VmState::FastSaved,
            32780 => VmState::FastSaving,
            32781 => VmState::ForceShutdown,
            32782 => VmState::ForceReboot,
            32783 => VmState::Hibernated,
            32784 => VmState::ComponentServicing,
            32785 => VmState::RunningCritical,
            32786 => VmState::OffCritical,
            32787 => VmState::StoppingCritical,
            32788 => VmState::SavedCritical,
            32789 => VmState::PausedCritical,
            32790 => VmState::StartingCritical,
            32791 => VmState::ResetCritical,
            32792 => VmState::SavingCritical,
            32793 => VmState::PausingCritical,
            32794 => VmState::ResumingCritical,
            32795 => VmState::FastSavedCritical,
            32796 => VmState::FastSavingCritical,
            _ => VmState::Unknown,
        }
    }

    pub fn value(&self) -> u16 {
        *self as u16
    }

    /// Fold a critical variant onto its base state.
    pub fn normalized(&self) -> Self {
        match self {
            VmState::RunningCritical => VmState::Running,
            VmState::OffCritical => VmState::Off,
            VmState::StoppingCritical => VmState::Stopping,
            VmState::SavedCritical => VmState::Saved,
            VmState::PausedCritical => VmState::Paused,
            VmState::StartingCritical => VmState::Starting,
            VmState::ResetCritical => VmState::Reset,
            VmState::SavingCritical => VmState::Saving,
            VmState::PausingCritical => VmState::Pausing,
            VmState::ResumingCritical => VmState::Resuming,
            VmState::FastSavedCritical => VmState::FastSaved,
            VmState::FastSavingCritical => VmState::FastSaving,
            other => *other,
        }
    }

    /// Equality modulo the critical variants.
    pub fn matches(&self, other: VmState) -> bool {
        self.normalized() == other.normalized()
    }

    pub fn is_critical(&self) -> bool {
        self.normalized() != *self
    }

    /// Check if VM state is persisted to disk and can be resumed.
    pub fn is_suspended(&self) -> bool {
        matches!(self.normalized(), VmState::Saved | VmState::FastSaved)
    }

    /// Starting or stopping; no other lifecycle request may be issued.
    pub(crate) fn is_busy(&self) -> bool {
        matches!(self.normalized(), VmState::Starting | VmState::Stopping)
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmState::Unknown => "Unknown",
            VmState::Other => "Other",
            VmState::Running => "Running",
            VmState::Off => "Off",
            VmState::Stopping => "Stopping",
            VmState::Saved => "Saved",
            VmState::Paused => "Paused",
            VmState::Starting => "Starting",
            VmState::Reset => "Reset",
            VmState::Saving => "Saving",
            VmState::Pausing => "Pausing",
            VmState::Resuming => "Resuming",
            VmState::FastSaved => "FastSaved",
            VmState::FastSaving => "FastSaving",
            VmState::ForceShutdown => "ForceShutdown",
            VmState::ForceReboot => "ForceReboot",
            VmState::Hibernated => "Hibernated",
            VmState::ComponentServicing => "ComponentServicing",
            VmState::RunningCritical => "RunningCritical",
            VmState::OffCritical => "OffCritical",
            VmState::StoppingCritical => "StoppingCritical",
            VmState::SavedCritical => "SavedCritical",
            VmState::PausedCritical => "PausedCritical",
            VmState::StartingCritical => "StartingCritical",
            VmState::ResetCritical => "ResetCritical",
            VmState::SavingCritical => "SavingCritical",
            VmState::PausingCritical => "PausingCritical",
            VmState::ResumingCritical => "ResumingCritical",
            VmState::FastSavedCritical => "FastSavedCritical",
            VmState::FastSavingCritical => "FastSavingCritical",
        };
        write!(f, "{}", s)
    }
}

/// Target for RequestStateChange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestedState {
    Running = 2,
    Off = 3,
    /// Graceful shutdown through the guest's shutdown integration service.
    Stopping = 4,
    Saved = 6,
    Paused = 9,
    Reset = 11,
}

impl RequestedState {
    pub fn value(&self) -> u16 {
        *self as u16
    }

    /// State the entity reports once the request has taken effect.
    pub fn target(&self) -> VmState {
        match self {
            RequestedState::Running => VmState::Running,
            RequestedState::Off => VmState::Off,
            RequestedState::Stopping => VmState::Stopping,
            RequestedState::Saved => VmState::Saved,
            RequestedState::Paused => VmState::Paused,
            RequestedState::Reset => VmState::Reset,
        }
    }

    pub const ALL: [RequestedState; 6] = [
        RequestedState::Running,
        RequestedState::Off,
        RequestedState::Stopping,
        RequestedState::Saved,
        RequestedState::Paused,
        RequestedState::Reset,
    ];
}

impl fmt::Display for RequestedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.target().fmt(f)
    }
}

/// Coarse lifecycle status tracked on a [`super::VirtualMachine`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VmStatus {
    #[default]
    Unknown,
    Creating,
    Starting,
    Running,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Saving,
    Saved,
    Rebooting,
}

impl VmStatus {
    /// Status implied by an observed enabled state.
    pub fn from_state(state: VmState) -> Self {
        match state.normalized() {
            VmState::Running => VmStatus::Running,
            VmState::Off => VmStatus::Stopped,
            VmState::Starting | VmState::Resuming => VmStatus::Starting,
            VmState::Stopping | VmState::ForceShutdown => VmStatus::Stopping,
            VmState::Saving | VmState::FastSaving => VmStatus::Saving,
            VmState::Saved | VmState::FastSaved | VmState::Hibernated => VmStatus::Saved,
            VmState::Pausing => VmStatus::Suspending,
            VmState::Paused => VmStatus::Suspended,
            VmState::Reset | VmState::ForceReboot => VmStatus::Rebooting,
            _ => VmStatus::Unknown,
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmStatus::Unknown => "Unknown",
            VmStatus::Creating => "Creating",
            VmStatus::Starting => "Starting",
            VmStatus::Running => "Running",
            VmStatus::Stopping => "Stopping",
            VmStatus::Stopped => "Stopped",
            VmStatus::Suspending => "Suspending",
            VmStatus::Suspended => "Suspended",
            VmStatus::Saving => "Saving",
            VmStatus::Saved => "Saved",
            VmStatus::Rebooting => "Rebooting",
        };
        write!(f, "{}", s)
    }
}

/// VM generation (Gen1 = BIOS, Gen2 = UEFI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Generation {
    /// Generation 1 VM (BIOS-based, IDE boot).
    #[default]
    Gen1,
    /// Generation 2 VM (UEFI-based, SCSI boot).
    Gen2,
}

impl Generation {
    /// Get the WMI VirtualSystemSubType value.
    pub fn to_subtype(&self) -> &'static str {
        match self {
            Generation::Gen1 => "Microsoft:Hyper-V:SubType:1",
            Generation::Gen2 => "Microsoft:Hyper-V:SubType:2",
        }
    }

    /// Parse from WMI VirtualSystemSubType value.
    pub fn from_subtype(subtype: &str) -> Self {
        if subtype.ends_with(":2") {
            Generation::Gen2
        } else {
            Generation::Gen1
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Gen1 => write!(f, "Generation 1"),
            Generation::Gen2 => write!(f, "Generation 2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [VmState; 30] = [
        VmState::Unknown,
        VmState::Other,
        VmState::Running,
        VmState::Off,
        VmState::Stopping,
        VmState::Saved,
        VmState::Paused,
        VmState::Starting,
        VmState::Reset,
        VmState::Saving,
        VmState::Pausing,
        VmState::Resuming,
        VmState::FastSaved,
        VmState::FastSaving,
        VmState::ForceShutdown,
        VmState::ForceReboot,
        VmState::Hibernated,
        VmState::ComponentServicing,
        VmState::RunningCritical,
        VmState::OffCritical,
        VmState::StoppingCritical,
        VmState::SavedCritical,
        VmState::PausedCritical,
        VmState::StartingCritical,
        VmState::ResetCritical,
        VmState::SavingCritical,
        VmState::PausingCritical,
        VmState::ResumingCritical,
        VmState::FastSavedCritical,
        VmState::FastSavingCritical,
    ];

    #[test]
    fn test_from_enabled_state_roundtrips_catalog() {
        for state in ALL_STATES {
            assert_eq!(VmState::from_enabled_state(state.value()), state);
        }
    }

    #[test]
    fn test_from_enabled_state_legacy_values() {
        assert_eq!(VmState::from_enabled_state(32768), VmState::Paused);
        assert_eq!(VmState::from_enabled_state(32769), VmState::Saved);
        assert_eq!(VmState::from_enabled_state(32770), VmState::Starting);
        assert_eq!(VmState::from_enabled_state(32774), VmState::Stopping);
        assert_eq!(VmState::from_enabled_state(5), VmState::Unknown);
        assert_eq!(VmState::from_enabled_state(65535), VmState::Unknown);
    }

    #[test]
    fn test_critical_variants_match_base_state() {
        assert!(VmState::RunningCritical.matches(VmState::Running));
        assert!(VmState::Running.matches(VmState::RunningCritical));
        assert!(VmState::OffCritical.matches(VmState::Off));
        assert!(VmState::FastSavingCritical.matches(VmState::FastSaving));
        assert!(!VmState::RunningCritical.matches(VmState::Off));

        for state in ALL_STATES {
            assert!(!state.normalized().is_critical());
            assert!(state.matches(state));
        }
    }

    #[test]
    fn test_suspended_and_busy() {
        assert!(VmState::Saved.is_suspended());
        assert!(VmState::SavedCritical.is_suspended());
        assert!(VmState::FastSaved.is_suspended());
        assert!(!VmState::Paused.is_suspended());

        assert!(VmState::Starting.is_busy());
        assert!(VmState::StoppingCritical.is_busy());
        assert!(!VmState::Saving.is_busy());
    }

    #[test]
    fn test_requested_state_values() {
        assert_eq!(RequestedState::Running.value(), 2);
        assert_eq!(RequestedState::Off.value(), 3);
        assert_eq!(RequestedState::Stopping.value(), 4);
        assert_eq!(RequestedState::Saved.value(), 6);
        assert_eq!(RequestedState::Paused.value(), 9);
        assert_eq!(RequestedState::Reset.value(), 11);
        for requested in RequestedState::ALL {
            assert_eq!(requested.target().value(), requested.value());
        }
    }

    #[test]
    fn test_status_from_state() {
        assert_eq!(VmStatus::from_state(VmState::Running), VmStatus::Running);
        assert_eq!(VmStatus::from_state(VmState::OffCritical), VmStatus::Stopped);
        assert_eq!(VmStatus::from_state(VmState::Saved), VmStatus::Saved);
        assert_eq!(VmStatus::from_state(VmState::Paused), VmStatus::Suspended);
        assert_eq!(VmStatus::from_state(VmState::Other), VmStatus::Unknown);
    }

    #[test]
    fn test_generation_subtype() {
        assert_eq!(Generation::Gen1.to_subtype(), "Microsoft:Hyper-V:SubType:1");
        assert_eq!(Generation::from_subtype("Microsoft:Hyper-V:SubType:2"), Generation::Gen2);
        assert_eq!(Generation::from_subtype("Microsoft:Hyper-V:SubType:1"), Generation::Gen1);
        assert_eq!(Generation::from_subtype(""), Generation::Gen1);
    }

    #[test]
    fn test_display() {
        assert_eq!(VmState::Running.to_string(), "Running");
        assert_eq!(VmState::SavedCritical.to_string(), "SavedCritical");
        assert_eq!(RequestedState::Stopping.to_string(), "Stopping");
        assert_eq!(VmStatus::Rebooting.to_string(), "Rebooting");
        assert_eq!(Generation::Gen2.to_string(), "Generation 2");
    }
}
