//! Drive layout table
//!
//! Maps a node's drive policy to disk numbers, letters and labels. There is
//! no general rule here, only two supported layouts and the Azure shift.

use std::fmt;

/// What a volume holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveRole {
    Data,
    Log,
    TempDb,
    TempDbLog,
    Backup,
    /// Single-volume layout: everything on one drive
    Combined,
}

/// One data disk's assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveAssignment {
    pub disk_number: u32,
    pub letter: char,
    pub label: &'static str,
    pub role: DriveRole,
}

impl DriveAssignment {
    /// Declaration name, e.g. `Disk_SQLData`
    pub fn declaration_name(&self) -> String {
        format!("Disk_{}", self.label)
    }

    pub fn root(&self) -> String {
        format!(r"{}:\", self.letter)
    }
}

impl fmt::Display for DriveAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ({}, disk {})", self.letter, self.label, self.disk_number)
    }
}

const FIVE_DRIVES: [(char, &str, DriveRole); 5] = [
    ('D', "SQLData", DriveRole::Data),
    ('E', "SQLLogs", DriveRole::Log),
    ('F', "TempDB", DriveRole::TempDb),
    ('G', "TempDBLog", DriveRole::TempDbLog),
    ('H', "Backup", DriveRole::Backup),
];

const ONE_DRIVE: [(char, &str, DriveRole); 1] = [('D', "SQL", DriveRole::Combined)];

/// SQL Server directories derived from a layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlPaths {
    pub data: String,
    pub log: String,
    pub tempdb: String,
    pub tempdb_log: String,
    pub backup: String,
}

/// The data disks of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveLayout {
    pub drives: Vec<DriveAssignment>,
}

impl DriveLayout {
    /// Supported drive counts
    pub const SUPPORTED: [u8; 2] = [1, 5];

    /// Look up the layout for a drive count.
    ///
    /// Disk 0 holds the OS. On Azure, disk 1 is the temp disk mounted on D:,
    /// so data disks start one disk number and one letter later.
    pub fn for_policy(drive_count: u8, azure: bool) -> Option<Self> {
        let table: &[(char, &str, DriveRole)] = match drive_count {
            1 => &ONE_DRIVE,
            5 => &FIVE_DRIVES,
            _ => return None,
        };
        let shift = u8::from(azure);
        let first_disk = 1 + u32::from(shift);

        let drives = table
            .iter()
            .zip(first_disk..)
            .map(|(&(letter, label, role), disk_number)| DriveAssignment {
                disk_number,
                letter: char::from(letter as u8 + shift),
                label,
                role,
            })
            .collect();
        Some(Self { drives })
    }

    /// The drive holding `role`, falling back to the combined volume
    pub fn drive_for(&self, role: DriveRole) -> Option<&DriveAssignment> {
        self.drives
            .iter()
            .find(|d| d.role == role)
            .or_else(|| self.drives.iter().find(|d| d.role == DriveRole::Combined))
    }

    /// Directories passed to the installer
    pub fn sql_paths(&self) -> Option<SqlPaths> {
        let path = |role, dir: &str| {
            self.drive_for(role)
                .map(|d| format!(r"{}MSSQL\{dir}", d.root()))
        };
        Some(SqlPaths {
            data: path(DriveRole::Data, "Data")?,
            log: path(DriveRole::Log, "Logs")?,
            tempdb: path(DriveRole::TempDb, "TempDB")?,
            tempdb_log: path(DriveRole::TempDbLog, "TempDBLog")?,
            backup: path(DriveRole::Backup, "Backup")?,
        })
    }
}
