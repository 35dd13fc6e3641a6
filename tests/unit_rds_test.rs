use shepherd::core::rds::{
    RdsUrlType, apply_instance_template, cluster_id_of, identify_rds_url_type, instance_template,
    is_green_instance, strip_green_suffix,
};

const WRITER_DNS: &str = "my-cluster.cluster-abc123xyz.us-east-1.rds.amazonaws.com";
const READER_DNS: &str = "my-cluster.cluster-ro-abc123xyz.us-east-1.rds.amazonaws.com";
const CUSTOM_DNS: &str = "reporting.cluster-custom-abc123xyz.us-east-1.rds.amazonaws.com";
const INSTANCE_DNS: &str = "instance-1.abc123xyz.us-east-1.rds.amazonaws.com";

#[tokio::test]
async fn test_url_type_classification() {
    assert_eq!(identify_rds_url_type(WRITER_DNS), RdsUrlType::ClusterWriterDns);
    assert_eq!(identify_rds_url_type(READER_DNS), RdsUrlType::ClusterReaderDns);
    assert_eq!(identify_rds_url_type(CUSTOM_DNS), RdsUrlType::ClusterCustomDns);
    assert_eq!(identify_rds_url_type(INSTANCE_DNS), RdsUrlType::InstanceDns);
    assert_eq!(identify_rds_url_type("10.0.1.17"), RdsUrlType::IpAddress);
    assert_eq!(identify_rds_url_type("localhost"), RdsUrlType::Other);
    assert_eq!(identify_rds_url_type(""), RdsUrlType::Other);
}

#[tokio::test]
async fn test_cluster_id_shared_between_writer_and_reader_endpoints() {
    let writer_id = cluster_id_of(WRITER_DNS, 5432).unwrap();
    let reader_id = cluster_id_of(READER_DNS, 5432).unwrap();
    assert_eq!(writer_id, reader_id);
    assert!(cluster_id_of("localhost", 5432).is_none());
}

#[tokio::test]
async fn test_cluster_id_differs_per_port() {
    assert_ne!(
        cluster_id_of(WRITER_DNS, 5432),
        cluster_id_of(WRITER_DNS, 5433)
    );
}

#[tokio::test]
async fn test_instance_template_derivation() {
    let template = instance_template(WRITER_DNS).unwrap();
    assert_eq!(template, "?.abc123xyz.us-east-1.rds.amazonaws.com");
    assert_eq!(
        apply_instance_template(&template, "instance-1"),
        INSTANCE_DNS
    );
}

#[tokio::test]
async fn test_green_suffix_detection_and_strip() {
    let green = "my-cluster-green-1a2b3c.cluster-abc123xyz.us-east-1.rds.amazonaws.com";
    assert!(is_green_instance(green));
    assert!(!is_green_instance(WRITER_DNS));
    assert_eq!(strip_green_suffix(green), WRITER_DNS);
    // Hosts without the suffix come back unchanged.
    assert_eq!(strip_green_suffix(WRITER_DNS), WRITER_DNS);
}
