//! Disk resources - data volumes, attach waits and the optical drive

use converge::{ApplyContext, ReconcileError, Resource, ResourceState, Result, RetryConfig, Session};

use super::{probe_properties, ps_quote};

/// A formatted NTFS data volume on a given disk
#[derive(Debug, Clone)]
pub struct Disk {
    pub disk_number: u32,
    pub letter: char,
    pub label: String,
    pub allocation_unit_kb: u32,
}

impl Disk {
    pub fn new(disk_number: u32, letter: char, label: impl Into<String>) -> Self {
        Self {
            disk_number,
            letter,
            label: label.into(),
            allocation_unit_kb: 64,
        }
    }

    pub fn with_allocation_unit(mut self, kb: u32) -> Self {
        self.allocation_unit_kb = kb;
        self
    }

    fn probe_script(&self) -> String {
        format!(
            "$p = Get-Partition -DiskNumber {disk} -ErrorAction SilentlyContinue | Where-Object DriveLetter -eq '{letter}'\n\
             if ($p) {{\n\
             \x20   $v = $p | Get-Volume\n\
             \x20   [pscustomobject]@{{ drive_letter = [string]$p.DriveLetter; label = $v.FileSystemLabel; file_system = $v.FileSystem; allocation_unit = $v.AllocationUnitSize }} | ConvertTo-Json -Compress\n\
             }}",
            disk = self.disk_number,
            letter = self.letter,
        )
    }

    /// Initialize, partition and format only what is missing; an existing
    /// NTFS volume is relabelled, never reformatted.
    fn apply_script(&self) -> String {
        format!(
            "$disk = Get-Disk -Number {disk}\n\
             if ($disk.IsOffline) {{ Set-Disk -Number {disk} -IsOffline $false }}\n\
             if ($disk.IsReadOnly) {{ Set-Disk -Number {disk} -IsReadOnly $false }}\n\
             if ($disk.PartitionStyle -eq 'RAW') {{ Initialize-Disk -Number {disk} -PartitionStyle GPT }}\n\
             $p = Get-Partition -DiskNumber {disk} -ErrorAction SilentlyContinue | Where-Object DriveLetter -eq '{letter}'\n\
             if (-not $p) {{ $p = New-Partition -DiskNumber {disk} -UseMaximumSize -DriveLetter '{letter}' }}\n\
             $v = $p | Get-Volume\n\
             if ($v.FileSystem -ne 'NTFS') {{\n\
             \x20   Format-Volume -DriveLetter '{letter}' -FileSystem NTFS -AllocationUnitSize {unit} -NewFileSystemLabel {label} -Confirm:$false | Out-Null\n\
             }} elseif ($v.FileSystemLabel -ne {label}) {{\n\
             \x20   Set-Volume -DriveLetter '{letter}' -NewFileSystemLabel {label}\n\
             }}",
            disk = self.disk_number,
            letter = self.letter,
            unit = u64::from(self.allocation_unit_kb) * 1024,
            label = ps_quote(&self.label),
        )
    }
}

impl Resource for Disk {
    fn id(&self) -> String {
        format!("disk:{}:", self.letter)
    }

    fn description(&self) -> String {
        format!("Disk {} as {}: ({})", self.disk_number, self.letter, self.label)
    }

    fn resource_type(&self) -> &'static str {
        "disk"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        probe_properties(session, &self.probe_script())
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present_with([
            ("drive_letter", self.letter.to_string()),
            ("label", self.label.clone()),
            ("file_system", "NTFS".to_string()),
        ])
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        ctx.run(&self.apply_script())?;
        Ok(())
    }
}

/// Wait until an attached disk is visible to the OS
#[derive(Debug, Clone)]
pub struct WaitForDisk {
    pub disk_number: u32,
    pub policy: RetryConfig,
}

impl WaitForDisk {
    pub fn new(disk_number: u32) -> Self {
        Self {
            disk_number,
            policy: RetryConfig::disk_wait(),
        }
    }

    pub fn with_policy(mut self, policy: RetryConfig) -> Self {
        self.policy = policy;
        self
    }
}

impl Resource for WaitForDisk {
    fn id(&self) -> String {
        format!("wait_for_disk:{}", self.disk_number)
    }

    fn description(&self) -> String {
        format!("Wait for disk {}", self.disk_number)
    }

    fn resource_type(&self) -> &'static str {
        "wait_for_disk"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        probe_properties(
            session,
            &format!(
                "Get-Disk -Number {} -ErrorAction SilentlyContinue | ForEach-Object {{ [pscustomobject]@{{ number = $_.Number; status = [string]$_.OperationalStatus }} }} | ConvertTo-Json -Compress",
                self.disk_number
            ),
        )
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present()
    }

    /// Rescan and report not-ready; the retry policy does the waiting
    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        ctx.run("Update-HostStorageCache")?;
        Err(ReconcileError::transient(format!(
            "disk {} is not visible yet",
            self.disk_number
        )))
    }

    fn retry_policy(&self) -> RetryConfig {
        self.policy.clone()
    }
}

/// Move the CD/DVD drive to a letter out of the data layout's way
#[derive(Debug, Clone)]
pub struct OpticalDrive {
    pub letter: char,
}

impl OpticalDrive {
    pub fn new(letter: char) -> Self {
        Self { letter }
    }
}

impl Resource for OpticalDrive {
    fn id(&self) -> String {
        "optical_drive".to_string()
    }

    fn description(&self) -> String {
        format!("Optical drive on {}:", self.letter)
    }

    fn resource_type(&self) -> &'static str {
        "optical_drive"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        probe_properties(
            session,
            "Get-CimInstance Win32_Volume -Filter 'DriveType = 5' | Select-Object -First 1 | ForEach-Object { [pscustomobject]@{ drive_letter = ([string]$_.DriveLetter).TrimEnd(':') } } | ConvertTo-Json -Compress",
        )
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present_with([("drive_letter", self.letter.to_string())])
    }

    /// A node without an optical drive is already fine
    fn is_converged(&self, current: &ResourceState, desired: &ResourceState) -> bool {
        current.is_absent() || current.satisfies(desired)
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        ctx.run(&format!(
            "Get-CimInstance Win32_Volume -Filter 'DriveType = 5' | Select-Object -First 1 | Set-CimInstance -Property @{{ DriveLetter = '{}:' }}",
            self.letter
        ))?;
        Ok(())
    }
}
