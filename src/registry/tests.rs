#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_to_oci_reference() {
        let image = ImageReference::normalize("gcr.io/google-containers/pause:3.2").unwrap();
        let reference = to_oci_reference(&image).unwrap();
        assert_eq!(reference.registry(), "gcr.io");
        assert_eq!(reference.repository(), "google-containers/pause");
        assert_eq!(reference.tag(), Some("3.2"));
    }

    #[test]
    fn test_to_oci_reference_hub_image() {
        let image = ImageReference::normalize("nginx").unwrap();
        let reference = to_oci_reference(&image).unwrap();
        assert_eq!(reference.repository(), "library/nginx");
    }

    #[test]
    fn test_to_oci_reference_with_port() {
        let image = ImageReference::normalize("localhost:5000/myapp:v1.0").unwrap();
        let reference = to_oci_reference(&image).unwrap();
        assert_eq!(reference.registry(), "localhost:5000");
        assert_eq!(reference.repository(), "myapp");
        assert_eq!(reference.tag(), Some("v1.0"));
    }
}
