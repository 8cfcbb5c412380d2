mod service_list_ext;

pub use self::service_list_ext::ServiceListExt;
