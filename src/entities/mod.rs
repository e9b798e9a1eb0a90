pub mod audit_event;
pub mod batch;
pub mod batch_number_config;
pub mod batch_number_sequence;
pub mod batch_relation;
pub mod batch_size_config;
pub mod hold_record;
pub mod inventory;
pub mod inventory_movement;
pub mod operation;
pub mod order_line_item;
pub mod process;
pub mod process_parameter_config;
pub mod process_template;
pub mod production_confirmation;
pub mod routing;
pub mod routing_step;
pub mod template_step;
pub mod unit_of_measure;
