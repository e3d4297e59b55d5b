//! Registry value resource

use converge::{ApplyContext, Resource, ResourceState, Result, Session};

use super::{probe_properties, ps_quote};

/// A string value under an HKLM key
#[derive(Debug, Clone)]
pub struct RegistryValue {
    /// PowerShell provider path, e.g. `HKLM:\SOFTWARE\sqlfleet`
    pub key: String,
    pub name: String,
    pub data: String,
    /// When false, any existing data is left alone
    pub overwrite: bool,
}

impl RegistryValue {
    pub fn new(key: impl Into<String>, name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            data: data.into(),
            overwrite: true,
        }
    }

    /// Write once; later runs keep whatever is there
    pub fn write_once(mut self) -> Self {
        self.overwrite = false;
        self
    }
}

impl Resource for RegistryValue {
    fn id(&self) -> String {
        format!("registry_value:{}\\{}", self.key, self.name)
    }

    fn description(&self) -> String {
        format!("Registry {}\\{} = {}", self.key, self.name, self.data)
    }

    fn resource_type(&self) -> &'static str {
        "registry_value"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        probe_properties(
            session,
            &format!(
                "$v = Get-ItemProperty -Path {} -Name {name} -ErrorAction SilentlyContinue\n\
                 if ($v) {{ [pscustomobject]@{{ data = [string]$v.{field} }} | ConvertTo-Json -Compress }}",
                ps_quote(&self.key),
                name = ps_quote(&self.name),
                field = ps_quote(&self.name),
            ),
        )
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present_with([("data", self.data.as_str())])
    }

    fn is_converged(&self, current: &ResourceState, desired: &ResourceState) -> bool {
        if self.overwrite {
            current.satisfies(desired)
        } else {
            current.is_present()
        }
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        let key = ps_quote(&self.key);
        ctx.run(&format!(
            "if (-not (Test-Path {key})) {{ New-Item -Path {key} -Force | Out-Null }}\n\
             Set-ItemProperty -Path {key} -Name {} -Value {} -Type String",
            ps_quote(&self.name),
            ps_quote(&self.data),
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = r"HKLM:\SOFTWARE\sqlfleet";

    #[test]
    fn test_overwrite_compares_data() {
        let version = RegistryValue::new(KEY, "Version", "2022");
        let old = ResourceState::present_with([("data", "2019")]);
        assert!(!version.is_converged(&old, &version.desired_state()));
    }

    #[test]
    fn test_write_once_accepts_any_existing_data() {
        let installed = RegistryValue::new(KEY, "InstallDate", "2026-10-17").write_once();
        let earlier = ResourceState::present_with([("data", "2025-01-02")]);
        assert!(installed.is_converged(&earlier, &installed.desired_state()));
        assert!(!installed.is_converged(&ResourceState::Absent, &installed.desired_state()));
    }

    #[test]
    fn test_identity_is_key_and_name() {
        let value = RegistryValue::new(KEY, "Version", "2022");
        assert_eq!(value.id(), r"registry_value:HKLM:\SOFTWARE\sqlfleet\Version");
    }
}
