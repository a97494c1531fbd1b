use crate::error::InstanceError;
use camino::Utf8Path;
use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::dictionary_std::tags;
use dicom::object::{open_file, DefaultDicomObject};

/// Parse the full DICOM dataset at `path`, overwrite its `InstitutionName`
/// (0008,0080) attribute with `tenant`, and re-serialize it to an in-memory
/// buffer, preserving the original transfer syntax.
pub fn mutate_institution_name(path: &Utf8Path, tenant: &str) -> Result<Vec<u8>, InstanceError> {
    let mut obj: DefaultDicomObject = open_file(path)?;
    set_institution_name(&mut obj, tenant);
    Ok(encode(&obj)?)
}

fn set_institution_name(obj: &mut DefaultDicomObject, tenant: &str) {
    obj.put(DataElement::new(
        tags::INSTITUTION_NAME,
        VR::LO,
        PrimitiveValue::from(tenant),
    ));
}

fn encode(obj: &DefaultDicomObject) -> Result<Vec<u8>, dicom::object::WriteError> {
    let mut buffer = Vec::new();
    obj.write_all(&mut buffer)?;
    Ok(buffer)
}
