pub mod auto_approval;
