use std::collections::HashSet;
use std::path::PathBuf;

use indexmap::IndexMap;
use knxproject_archive::{Archive, LogicalFile};
use knxproject_errors::Result;
use knxproject_model::document::KnxProject;
use knxproject_model::refs::strip_module_instance;
use knxproject_model::types::DeviceInstance;
use knxproject_model::{appprogram, document, hardware, master, project};

/// Schema version of ETS 4.1/4.2 projects (`knxproject_archive::SchemaVersion::ETS_4`),
/// the one dialect that never prefixes communication-object ref ids with the
/// application-program id (spec §4.5, last paragraph).
const ETS4_SCHEMA_VERSION: u32 = 11;

/// The three caller inputs the resolution engine needs to resolve a project:
/// the archive path, an optional password for protected projects, and an
/// optional preferred language code.
#[derive(Debug, Clone)]
pub struct Configuration {
    path: PathBuf,
    password: Option<String>,
    language: Option<String>,
}

impl Configuration {
    /// Build a configuration for resolving the project at `path`.
    pub fn new(path: impl Into<PathBuf>, password: Option<String>, language: Option<String>) -> Self {
        Self { path: path.into(), password, language }
    }

    /// Open, parse and resolve the project into its final output document
    /// (C1 through C6, then the flattening pass).
    pub fn resolve(self) -> Result<KnxProject> {
        let mut archive = Archive::open(&self.path, self.password.as_deref())?;

        let master_xml = archive.read(LogicalFile::KnxMaster)?;
        let master_data = master::load(&master_xml, self.language.as_deref())?;

        let mut catalog = hardware::HardwareCatalog::default();
        for manufacturer in archive.manufacturers() {
            let hardware_xml = archive.read(LogicalFile::Hardware { manufacturer: &manufacturer })?;
            let manufacturer_catalog = hardware::load(&hardware_xml, &master_data)?;
            catalog.products.extend(manufacturer_catalog.products);
            catalog.application_program_refs.extend(manufacturer_catalog.application_program_refs);
        }

        let project_0_xml = archive.read(LogicalFile::Project0)?;
        let project_meta_xml = archive.read(LogicalFile::ProjectMeta)?;
        let schema_version = archive.schema_version().0;
        let project_id = archive.project_id().to_owned();
        let (mut project, info) =
            project::load(&project_0_xml, &project_meta_xml, schema_version, &project_id, &master_data)?;

        enrich_devices(&mut project, &catalog, &master_data);
        resolve_com_object_ref_ids(&mut project, schema_version);

        let programs = load_application_programs(&mut archive, &project, &master_data)?;

        for device in devices_mut(&mut project) {
            let Some(app_id) = device.application_program_id.clone() else { continue };
            if let Some(program) = programs.get(&app_id) {
                appprogram::merge_device(device, &app_id, program);
            }
        }

        Ok(document::build(project, info, master_data.resolved_language))
    }
}

fn devices_mut(project: &mut project::Project) -> impl Iterator<Item = &mut DeviceInstance> {
    project.areas.iter_mut().flat_map(|area| area.lines.iter_mut()).flat_map(|line| line.devices.iter_mut())
}

fn devices_ref(project: &project::Project) -> impl Iterator<Item = &DeviceInstance> {
    project.areas.iter().flat_map(|area| area.lines.iter()).flat_map(|line| line.devices.iter())
}

/// Resolve each device's manufacturer display name, product/hardware
/// display names and order number, and its chosen application-program id,
/// from the combined hardware catalog (spec §4.4/§5 grouping step).
fn enrich_devices(project: &mut project::Project, catalog: &hardware::HardwareCatalog, master_data: &master::MasterData) {
    for device in devices_mut(project) {
        device.manufacturer_name = master_data.manufacturers.get(&device.manufacturer).cloned();

        if let Some(product) = catalog.products.get(&device.product_ref) {
            device.product_name = Some(product.text.clone());
            device.hardware_name = Some(product.hardware_name.clone());
            device.order_number = Some(product.order_number.clone());
        }

        match catalog.application_program_refs.get(&device.hardware_program_ref) {
            Some(app_id) => device.application_program_id = Some(app_id.clone()),
            None => tracing::warn!(
                device = %device.identifier,
                hardware_program_ref = %device.hardware_program_ref,
                "device's hardware-program reference is absent from every manufacturer catalog; \
                 it will be emitted without communication objects"
            ),
        }
    }
}

/// Shorten each instance ref's `ref_id` via `strip_module_instance(..., "O")`
/// and prefix it with the device's application-program id to produce
/// `com_object_ref_id`, the key the application-program loader's retained
/// set and the per-device merge both index by. ETS 4 projects keep the
/// ref-id as-is (spec §4.5).
fn resolve_com_object_ref_ids(project: &mut project::Project, schema_version: u32) {
    for device in devices_mut(project) {
        let Some(app_id) = device.application_program_id.clone() else { continue };
        for instance_ref in &mut device.com_object_instance_refs {
            instance_ref.com_object_ref_id = if schema_version == ETS4_SCHEMA_VERSION {
                instance_ref.ref_id.clone()
            } else {
                format!("{app_id}_{}", strip_module_instance(&instance_ref.ref_id, "O"))
            };
        }
    }
}

type ProgramJob = (String, Vec<u8>, HashSet<String>, HashSet<String>);

/// Group devices by their chosen application-program file, read each file
/// exactly once, and parse it (spec §5 grouping step; C6 phase 1).
fn load_application_programs(
    archive: &mut Archive,
    project: &project::Project,
    master_data: &master::MasterData,
) -> Result<IndexMap<String, appprogram::ApplicationProgram>> {
    let mut grouped: IndexMap<String, Vec<DeviceInstance>> = IndexMap::new();
    for device in devices_ref(project) {
        match &device.application_program_id {
            Some(app_id) => grouped.entry(app_id.clone()).or_default().push(device.clone()),
            None => tracing::warn!(
                device = %device.identifier,
                "device has no application program; emitted without communication objects"
            ),
        }
    }

    let mut jobs: Vec<ProgramJob> = Vec::with_capacity(grouped.len());
    for (app_id, devices) in &grouped {
        let retained_refs = appprogram::retained_com_object_ref_ids(devices);
        let retained_args = appprogram::retained_argument_ids(app_id, devices);
        let manufacturer = app_id.split('_').next().unwrap_or(app_id.as_str()).to_owned();
        let xml = archive.read(LogicalFile::ApplicationProgram { manufacturer: &manufacturer, program_id: app_id })?;
        jobs.push((app_id.clone(), xml, retained_refs, retained_args));
    }

    #[cfg(feature = "parallel")]
    {
        load_programs_parallel(jobs, master_data)
    }
    #[cfg(not(feature = "parallel"))]
    {
        load_programs_sequential(jobs, master_data)
    }
}

#[cfg(not(feature = "parallel"))]
fn load_programs_sequential(
    jobs: Vec<ProgramJob>,
    master_data: &master::MasterData,
) -> Result<IndexMap<String, appprogram::ApplicationProgram>> {
    let mut programs = IndexMap::with_capacity(jobs.len());
    for (app_id, xml, retained_refs, retained_args) in jobs {
        let program = appprogram::load(&xml, &app_id, &retained_refs, &retained_args, master_data)?;
        programs.insert(app_id, program);
    }
    Ok(programs)
}

/// Run one parse per distinct application-program file on
/// `knxproject_scheduler::ThreadPool`. Each parse is independent, so the
/// only shared mutable state is the result channel; devices are merged
/// (C6 phase 2) only after every parse has completed.
#[cfg(feature = "parallel")]
fn load_programs_parallel(
    jobs: Vec<ProgramJob>,
    master_data: &master::MasterData,
) -> Result<IndexMap<String, appprogram::ApplicationProgram>> {
    use std::num::NonZeroUsize;

    use knxproject_scheduler::ThreadPool;

    let job_count = jobs.len();
    if job_count == 0 {
        return Ok(IndexMap::new());
    }

    let pool_size = NonZeroUsize::new(job_count).expect("checked non-empty above");
    let pool: ThreadPool<'_, ()> = ThreadPool::new(pool_size).map_err(knxproject_errors::Error::Io)?;
    let (result_sender, result_receiver) = async_channel::unbounded();

    for (app_id, xml, retained_refs, retained_args) in jobs {
        let master_data = master_data.clone();
        let result_sender = result_sender.clone();
        pool.execute(async move {
            let outcome = appprogram::load(&xml, &app_id, &retained_refs, &retained_args, &master_data);
            let _ = result_sender.send((app_id, outcome)).await;
        })
        .expect("the result channel stays open for the lifetime of this function");
    }
    drop(result_sender);

    let mut programs = IndexMap::with_capacity(job_count);
    for _ in 0..job_count {
        let (app_id, outcome) = futures_lite::future::block_on(result_receiver.recv())
            .expect("every submitted job sends exactly one result before the channel closes");
        programs.insert(app_id, outcome?);
    }
    Ok(programs)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    const KNX_MASTER: &str = r#"<?xml version="1.0"?>
<KNX xmlns="http://knx.org/xml/project/20">
  <ManufacturerData>
    <Manufacturer Id="M-0083" Name="Test Manufacturer"/>
  </ManufacturerData>
</KNX>"#;

    const PROJECT_META: &str = r#"<Project><ProjectInformation Id="P-031F" Name="Demo" GroupAddressStyle="ThreeLevel"/></Project>"#;

    const PROJECT_0: &str = r#"<Project>
  <Installation>
    <GroupAddresses>
      <GroupRanges>
        <GroupRange Id="GR-1" Name="Lights" RangeStart="0" RangeEnd="2047">
          <GroupAddress Id="GA-1" Name="Kitchen light" Address="2054"/>
        </GroupRange>
      </GroupRanges>
    </GroupAddresses>
    <Topology>
      <Area Address="1" Name="Area 1">
        <Line Address="1" Name="Line 1">
          <DeviceInstance Id="D-1" Address="5" ProductRefId="M-0083_H-1-1_P-1" Hardware2ProgramRefId="HP-1" Name="Actuator">
            <ComObjectInstanceRefs>
              <ComObjectInstanceRef Id="I-1" RefId="O-1_R-1" Links="GA-1"/>
            </ComObjectInstanceRefs>
          </DeviceInstance>
        </Line>
      </Area>
    </Topology>
  </Installation>
</Project>"#;

    const HARDWARE: &str = r#"<KNX>
  <Manufacturer>
    <Hardware>
      <Hardware Id="H-1" Name="Actuator HW">
        <Products>
          <Product Id="M-0083_H-1-1_P-1" Text="4-fold actuator" OrderNumber="12345"/>
        </Products>
        <Hardware2Programs>
          <Hardware2Program Id="HP-1">
            <ApplicationProgramRef RefId="M-0083_A-10-1"/>
          </Hardware2Program>
        </Hardware2Programs>
      </Hardware>
    </Hardware>
  </Manufacturer>
</KNX>"#;

    const APPLICATION_PROGRAM: &str = r#"<ApplicationProgram>
  <Static>
    <ComObjectTable>
      <ComObject Id="M-0083_A-10-1_O-1" Number="1" Text="Switch object" ObjectSize="1 Bit"
        ReadFlag="Enabled" WriteFlag="Enabled" TransmitFlag="Enabled" CommunicationFlag="Enabled"
        UpdateFlag="Disabled" ReadOnInitFlag="Disabled"/>
    </ComObjectTable>
    <ComObjectRefs>
      <ComObjectRef Id="M-0083_A-10-1_O-1_R-1" RefId="M-0083_A-10-1_O-1"/>
    </ComObjectRefs>
  </Static>
</ApplicationProgram>"#;

    fn build_fixture_archive() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = ZipWriter::new(file.reopen().unwrap());
        let options = SimpleFileOptions::default();

        writer.start_file("P-031F.signature", options).unwrap();
        writer.start_file("knx_master.xml", options).unwrap();
        writer.write_all(KNX_MASTER.as_bytes()).unwrap();
        writer.start_file("P-031F/project.xml", options).unwrap();
        writer.write_all(PROJECT_META.as_bytes()).unwrap();
        writer.start_file("P-031F/0.xml", options).unwrap();
        writer.write_all(PROJECT_0.as_bytes()).unwrap();
        writer.start_file("M-0083/Hardware.xml", options).unwrap();
        writer.write_all(HARDWARE.as_bytes()).unwrap();
        writer.start_file("M-0083/M-0083_A-10-1.xml", options).unwrap();
        writer.write_all(APPLICATION_PROGRAM.as_bytes()).unwrap();
        writer.finish().unwrap();

        file
    }

    #[test]
    fn resolves_an_unprotected_schema_20_project_end_to_end() {
        let archive = build_fixture_archive();
        let document = Configuration::new(archive.path(), None, None).resolve().unwrap();

        assert_eq!(document.info.project_id, "P-031F");
        assert_eq!(document.info.xknxproject_version, env!("CARGO_PKG_VERSION"));

        let device = document.devices.get("1.1.5").unwrap();
        assert_eq!(device.product_name.as_deref(), Some("4-fold actuator"));
        assert_eq!(device.hardware_name.as_deref(), Some("Actuator HW"));
        assert_eq!(device.manufacturer_name.as_deref(), Some("Test Manufacturer"));
        assert_eq!(device.communication_object_ids, vec!["1.1.5/O-1_R-1".to_owned()]);

        let object = document.communication_objects.get("1.1.5/O-1_R-1").unwrap();
        assert_eq!(object.text.as_deref(), Some("Switch object"));
        assert_eq!(object.number, Some(1));
        assert_eq!(object.group_address_links, vec!["1/0/6".to_owned()]);

        let group_address = document.group_addresses.values().find(|ga| ga.inner.identifier == "GA-1").unwrap();
        assert_eq!(group_address.communication_object_ids, vec!["1.1.5/O-1_R-1".to_owned()]);
    }
}
